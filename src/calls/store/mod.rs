//! # Call Store
//!
//! Durable keyed storage for call records. Every mutation the rest of the service
//! performs on a call goes through one of the atomic operations defined here.
//!
//! ## Guarantees every implementation must provide:
//! - **get_or_create**: never creates two records for one `call_id`, even under concurrent callers
//! - **advance_sequence**: applies only when `sequence > last_sequence`, as one atomic update
//! - **set_status / save_result**: unconditional overwrites, durable before returning
//!
//! ## Implementations:
//! - [`SqliteCallStore`]: sqlx pool over SQLite, atomicity from the database
//! - [`MemoryCallStore`]: in-process map behind an async mutex (tests, `database.url = "memory"`)

use crate::calls::{Call, CallStatus, Sentiment};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCallStore;
pub use sqlite::SqliteCallStore;

/// Failures surfaced by a call store.
///
/// Storage errors are fatal to the operation that hit them. Nothing in this
/// service retries them.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying database rejected or failed the statement
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded into a [`Call`]
    #[error("Corrupt call record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage contract for call records.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Return the record for `call_id`, creating it with defaults if absent.
    async fn get_or_create(&self, call_id: &str) -> StoreResult<Call>;

    /// Move `last_sequence` to `sequence` if and only if it is strictly greater
    /// than the stored value; bump `packet_count` in the same update when
    /// `increment_count` is set.
    ///
    /// Returns whether the update applied. A stale or duplicate sequence is a
    /// no-op, not an error.
    async fn advance_sequence(
        &self,
        call_id: &str,
        sequence: i64,
        increment_count: bool,
    ) -> StoreResult<bool>;

    /// Overwrite the status of a call.
    async fn set_status(&self, call_id: &str, status: CallStatus) -> StoreResult<()>;

    /// Store enrichment output and mark the call `Completed` in one update.
    async fn save_result(
        &self,
        call_id: &str,
        transcription: &str,
        sentiment: Sentiment,
    ) -> StoreResult<()>;

    /// Fetch a call without creating it.
    async fn get(&self, call_id: &str) -> StoreResult<Option<Call>>;
}
