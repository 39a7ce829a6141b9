//! # AI Enrichment Client
//!
//! Retry wrapper around an [`EnrichmentCapability`].
//!
//! ## Retry Policy:
//! - At most `max_attempts` attempts in total (5 by default)
//! - Before attempt `n + 1` the client sleeps `unit * min(2^(n-1), max_backoff_units)`,
//!   which gives 1, 2, 4, 8, 10 units with the defaults
//! - Only [`FailureKind::Transient`](super::FailureKind) failures are retried
//! - Once attempts run out the last error is returned, never swallowed

use super::{Analysis, EnrichmentCapability, EnrichmentError};
use crate::config::EnrichmentConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capped exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Length of one backoff time unit
    pub backoff_unit: Duration,
    /// Upper bound on a single delay, in units
    pub max_backoff_units: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
            max_backoff_units: 10,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
            max_backoff_units: config.max_backoff_units,
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based), before the next one.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let units = 2u32
            .checked_pow(exponent)
            .unwrap_or(u32::MAX)
            .min(self.max_backoff_units);
        self.backoff_unit.saturating_mul(units)
    }
}

/// Successful analysis plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub analysis: Analysis,
    pub attempts: u32,
}

pub struct AiEnrichmentClient {
    capability: Arc<dyn EnrichmentCapability>,
    policy: RetryPolicy,
}

impl AiEnrichmentClient {
    pub fn new(capability: Arc<dyn EnrichmentCapability>, policy: RetryPolicy) -> Self {
        Self { capability, policy }
    }

    /// Analyze `packets`, retrying transient failures per the policy.
    pub async fn analyze(&self, packets: &[String]) -> Result<Enriched, EnrichmentError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.capability.analyze(packets).await {
                Ok(analysis) => {
                    info!(
                        attempt,
                        sentiment = %analysis.sentiment,
                        "Enrichment attempt succeeded"
                    );
                    return Ok(Enriched {
                        analysis,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    debug!(attempt, kind = %err.kind, error = %err, "Enrichment attempt failed");

                    if !err.is_transient() {
                        error!(
                            attempt,
                            error = %err,
                            "Enrichment failed with a non-retryable error"
                        );
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        error!(
                            attempts = attempt,
                            error = %err,
                            "Enrichment retries exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying enrichment after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
