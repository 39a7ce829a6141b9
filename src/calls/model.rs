//! # Call Records
//!
//! The durable state kept for every call, keyed by the externally supplied `call_id`.
//!
//! ## Call Lifecycle:
//! 1. **IN_PROGRESS**: Created by the first packet, collecting packets
//! 2. **PROCESSING_AI**: Packet threshold reached, enrichment running in the background
//! 3. **COMPLETED**: Transcription and sentiment saved
//! 4. **FAILED**: Enrichment gave up (retries exhausted or permanent failure)
//! 5. **ARCHIVED**: Set by an outside process only, never by this service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current status of a call.
///
/// Stored as its upper-case name (`"IN_PROGRESS"`, `"PROCESSING_AI"`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Packets are still arriving
    #[default]
    InProgress,
    /// Enrichment has been started for this call
    ProcessingAi,
    /// Enrichment results have been saved
    Completed,
    /// Enrichment failed terminally
    Failed,
    /// Retired by an external archival process
    Archived,
}

impl CallStatus {
    /// Convert status to the string used in storage and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::InProgress => "IN_PROGRESS",
            CallStatus::ProcessingAi => "PROCESSING_AI",
            CallStatus::Completed => "COMPLETED",
            CallStatus::Failed => "FAILED",
            CallStatus::Archived => "ARCHIVED",
        }
    }

    /// Whether enrichment has finished one way or the other.
    #[cfg(test)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed | CallStatus::Archived)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(CallStatus::InProgress),
            "PROCESSING_AI" => Ok(CallStatus::ProcessingAi),
            "COMPLETED" => Ok(CallStatus::Completed),
            "FAILED" => Ok(CallStatus::Failed),
            "ARCHIVED" => Ok(CallStatus::Archived),
            other => Err(format!("unknown call status '{}'", other)),
        }
    }
}

/// Sentiment label produced by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::Mixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            "mixed" => Ok(Sentiment::Mixed),
            other => Err(format!("unknown sentiment '{}'", other)),
        }
    }
}

/// One durable call record.
///
/// ## Invariants:
/// - `last_sequence` never decreases
/// - `packet_count` grows by exactly one for every packet that advanced `last_sequence`
/// - `transcription` and `sentiment` are only set together with `Completed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub call_id: String,
    pub status: CallStatus,
    pub last_sequence: i64,
    pub packet_count: i64,
    pub transcription: Option<String>,
    pub sentiment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    /// Fresh record with defaults, as created by the first packet of a call.
    pub fn new(call_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            status: CallStatus::InProgress,
            last_sequence: 0,
            packet_count: 0,
            transcription: None,
            sentiment: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_call_defaults() {
        let call = Call::new("X");
        assert_eq!(call.call_id, "X");
        assert_eq!(call.status, CallStatus::InProgress);
        assert_eq!(call.last_sequence, 0);
        assert_eq!(call.packet_count, 0);
        assert!(call.transcription.is_none());
        assert!(call.sentiment.is_none());
    }

    #[test]
    fn test_status_parses_its_own_name() {
        for status in [
            CallStatus::InProgress,
            CallStatus::ProcessingAi,
            CallStatus::Completed,
            CallStatus::Failed,
            CallStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>(), Ok(status));
        }
        assert!("DONE".parse::<CallStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&CallStatus::ProcessingAi).unwrap();
        assert_eq!(json, "\"PROCESSING_AI\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CallStatus::InProgress.is_terminal());
        assert!(!CallStatus::ProcessingAi.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
    }

    #[test]
    fn test_sentiment_strings() {
        assert_eq!(Sentiment::Mixed.to_string(), "mixed");
        assert_eq!("negative".parse::<Sentiment>(), Ok(Sentiment::Negative));
        let json = serde_json::to_string(&Sentiment::Positive).unwrap();
        assert_eq!(json, "\"positive\"");
    }
}
