//! # AI Capability
//!
//! A single, unretried attempt at transcription and sentiment analysis.
//!
//! The production service has no real model behind it. [`MockAiCapability`] stands
//! in for one and honours the same contract: it fails transiently with a configured
//! probability and otherwise answers after a random latency. An empty packet batch
//! is rejected up front as a permanent failure; retrying it cannot help.

use super::{Analysis, EnrichmentError};
use crate::calls::Sentiment;
use crate::config::EnrichmentConfig;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Longest prefix of the joined packets kept in a mock transcription.
const TRANSCRIPT_PREVIEW_CHARS: usize = 150;

/// One attempt at enriching a call's packets.
#[async_trait]
pub trait EnrichmentCapability: Send + Sync {
    async fn analyze(&self, packets: &[String]) -> Result<Analysis, EnrichmentError>;
}

/// Simulated external AI service.
#[derive(Debug, Clone)]
pub struct MockAiCapability {
    /// Probability in `[0.0, 1.0]` that an attempt fails with a transient error
    failure_rate: f64,
    min_latency: Duration,
    max_latency: Duration,
}

impl MockAiCapability {
    pub fn new(failure_rate: f64, min_latency: Duration, max_latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            min_latency,
            max_latency: max_latency.max(min_latency),
        }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(
            config.failure_rate,
            Duration::from_millis(config.min_latency_ms),
            Duration::from_millis(config.max_latency_ms),
        )
    }
}

#[async_trait]
impl EnrichmentCapability for MockAiCapability {
    async fn analyze(&self, packets: &[String]) -> Result<Analysis, EnrichmentError> {
        if packets.is_empty() {
            return Err(EnrichmentError::permanent("no audio packets to analyze"));
        }

        // ThreadRng is not Send, so all randomness is drawn before the first await.
        let (fails, latency, sentiment) = {
            let mut rng = rand::thread_rng();
            let fails = rng.gen_bool(self.failure_rate);
            let latency = rng.gen_range(self.min_latency..=self.max_latency);
            let sentiment = *Sentiment::ALL
                .choose(&mut rng)
                .unwrap_or(&Sentiment::Neutral);
            (fails, latency, sentiment)
        };

        if fails {
            warn!("Mock AI service failed (simulating 503)");
            return Err(EnrichmentError::transient(
                "AI service temporarily unavailable (503)",
            ));
        }

        info!(latency_ms = latency.as_millis() as u64, "Mock AI processing");
        tokio::time::sleep(latency).await;

        let transcription = mock_transcription(packets);
        info!(sentiment = %sentiment, "Mock AI completed");

        Ok(Analysis {
            transcription,
            sentiment,
        })
    }
}

fn mock_transcription(packets: &[String]) -> String {
    let combined = packets.join(" ");
    let preview: String = combined.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
    format!("[Transcribed] {}...", preview)
}
