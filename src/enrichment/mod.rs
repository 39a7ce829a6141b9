//! # Call Enrichment
//!
//! Transcription and sentiment analysis for calls that collected enough packets.
//! The external AI capability is slow and flaky, so everything here is built to
//! keep that unreliability away from packet ingestion.
//!
//! ## Key Components:
//! - **Capability**: one attempt at analysis against the external AI service
//! - **Client**: retry with capped exponential backoff around a capability
//! - **Coordinator**: spawns detached enrichment runs, at most one per call, and
//!   turns their outcome into a call status
//!
//! ## Failure Classification:
//! Every failure carries an explicit [`FailureKind`]. Only `Transient` failures are
//! retried; retry code never inspects error messages or concrete types.

use crate::calls::Sentiment;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod capability;
pub mod client;
pub mod coordinator;

pub use capability::{EnrichmentCapability, MockAiCapability};
pub use client::{AiEnrichmentClient, RetryPolicy};
pub use coordinator::EnrichmentCoordinator;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Temporary unavailability, retried with backoff
    Transient,
    /// Anything else, terminal on first occurrence
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure reported by the enrichment capability or the client wrapping it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} enrichment failure: {message}")]
pub struct EnrichmentError {
    pub kind: FailureKind,
    pub message: String,
}

impl EnrichmentError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Output of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub transcription: String,
    pub sentiment: Sentiment,
}
