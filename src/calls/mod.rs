//! # Calls
//!
//! Call records, their storage, and packet ingestion.

pub mod ingest;
pub mod model;
pub mod store;

pub use ingest::{AudioPacket, PacketIngestion};
pub use model::{Call, CallStatus, Sentiment};
