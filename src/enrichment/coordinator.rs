//! # Enrichment Coordinator
//!
//! Bridges synchronous packet ingestion to background enrichment.
//!
//! ## Responsibilities:
//! - **Fire-and-forget**: [`EnrichmentCoordinator::trigger`] spawns a detached task and
//!   returns immediately; the ingesting request never awaits it
//! - **At most one run per call**: live task handles are tracked by `call_id`, and a
//!   second trigger for a call with a live run is refused
//! - **Outcome mapping**: success saves the result (`COMPLETED`), every failure,
//!   including a panic inside the run, becomes `FAILED`
//! - **Runtime**: runs are spawned on the runtime handle given at construction,
//!   not on the caller's. Actix workers each drive their own runtime and drop its
//!   tasks when the server stops, which would cut runs off before the drain
//! - **Shutdown**: new triggers are refused, in-flight runs get a grace period,
//!   then are aborted
//!
//! ## Status Transitions Owned Here:
//! IN_PROGRESS → PROCESSING_AI → COMPLETED | FAILED

use super::client::AiEnrichmentClient;
use super::EnrichmentError;
use crate::calls::store::{CallStore, StoreError};
use crate::calls::{CallStatus, Sentiment};
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why a background enrichment run did not complete.
#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    #[error("storage failure during enrichment: {0}")]
    Store(#[from] StoreError),

    #[error("enrichment task panicked")]
    Panicked,
}

/// Live run for one call. `id` lets a finishing task remove only its own entry.
struct InFlight {
    id: u64,
    handle: JoinHandle<()>,
}

/// Lifetime counters, exposed on the metrics endpoint.
#[derive(Debug, Default)]
struct CoordinatorCounters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected_duplicates: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CoordinatorSnapshot {
    pub in_flight: usize,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected_duplicates: u64,
}

pub struct EnrichmentCoordinator {
    store: Arc<dyn CallStore>,
    client: Arc<AiEnrichmentClient>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    counters: Arc<CoordinatorCounters>,
    next_run_id: AtomicU64,
    runtime: Handle,
    /// Set by `shutdown` while holding the registry lock
    closing: AtomicBool,
}

impl EnrichmentCoordinator {
    /// `runtime` must outlive the HTTP workers; the process's main runtime does.
    pub fn new(
        store: Arc<dyn CallStore>,
        client: Arc<AiEnrichmentClient>,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            client,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(CoordinatorCounters::default()),
            next_run_id: AtomicU64::new(1),
            runtime,
            closing: AtomicBool::new(false),
        }
    }

    /// Start enrichment for `call_id` in the background.
    ///
    /// Returns `false` without spawning when a run for this call is still live, or
    /// once shutdown has begun. Callable from any thread.
    pub fn trigger(&self, call_id: &str, packets: Vec<String>) -> bool {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.closing.load(Ordering::SeqCst) {
            warn!(call_id, "Coordinator shutting down, enrichment not started");
            return false;
        }

        if let Some(existing) = in_flight.get(call_id) {
            if !existing.handle.is_finished() {
                debug!(call_id, "Enrichment already in flight, trigger ignored");
                self.counters.rejected_duplicates.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let store = self.store.clone();
        let client = self.client.clone();
        let counters = self.counters.clone();
        let registry = self.in_flight.clone();
        let owned_id = call_id.to_string();

        // The registry lock is held until the handle is inserted, so the task's
        // own removal below always runs after the insert.
        let handle = self.runtime.spawn(async move {
            run_enrichment(store, client, counters, &owned_id, packets).await;

            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if registry.get(&owned_id).map(|run| run.id) == Some(id) {
                registry.remove(&owned_id);
            }
        });

        in_flight.insert(call_id.to_string(), InFlight { id, handle });
        info!(call_id, "Enrichment queued");
        true
    }

    /// Whether a run for `call_id` is currently live.
    #[cfg(test)]
    pub fn is_in_flight(&self, call_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
            .map(|run| !run.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|run| !run.handle.is_finished())
            .count();

        CoordinatorSnapshot {
            in_flight,
            started: self.counters.started.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected_duplicates: self.counters.rejected_duplicates.load(Ordering::Relaxed),
        }
    }

    /// Wait up to `grace` for in-flight runs to finish, then abort the rest.
    ///
    /// Returns the number of runs that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let runs: Vec<InFlight> = {
            let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
            self.closing.store(true, Ordering::SeqCst);
            in_flight
                .drain()
                .map(|(_, run)| run)
                .filter(|run| !run.handle.is_finished())
                .collect()
        };

        if runs.is_empty() {
            return 0;
        }

        info!(
            count = runs.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining in-flight enrichment"
        );

        let aborts: Vec<_> = runs.iter().map(|run| run.handle.abort_handle()).collect();
        let handles = runs.into_iter().map(|run| run.handle);

        match tokio::time::timeout(grace, futures_util::future::join_all(handles)).await {
            Ok(_) => 0,
            Err(_) => {
                let mut aborted = 0;
                for abort in aborts {
                    if !abort.is_finished() {
                        abort.abort();
                        aborted += 1;
                    }
                }
                warn!(aborted, "Aborted enrichment still running after grace period");
                aborted
            }
        }
    }
}

/// Body of one detached enrichment run. Never returns an error: every outcome is
/// turned into a status write and a log event.
async fn run_enrichment(
    store: Arc<dyn CallStore>,
    client: Arc<AiEnrichmentClient>,
    counters: Arc<CoordinatorCounters>,
    call_id: &str,
    packets: Vec<String>,
) {
    counters.started.fetch_add(1, Ordering::Relaxed);
    info!(call_id, packets = packets.len(), "Enrichment started");

    let outcome = AssertUnwindSafe(enrich(store.as_ref(), &client, call_id, &packets))
        .catch_unwind()
        .await
        .unwrap_or(Err(RunError::Panicked));

    match outcome {
        Ok(sentiment) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            info!(call_id, sentiment = %sentiment, "Enrichment completed");
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            let kind = match &err {
                RunError::Enrichment(e) => e.kind.to_string(),
                RunError::Store(_) => "storage".to_string(),
                RunError::Panicked => "panic".to_string(),
            };
            error!(call_id, error = %err, kind = %kind, "Enrichment failed");

            // Best effort: if storage itself is down this write fails too.
            if let Err(store_err) = store.set_status(call_id, CallStatus::Failed).await {
                error!(call_id, error = %store_err, "Could not record failed enrichment");
            }
        }
    }
}

async fn enrich(
    store: &dyn CallStore,
    client: &AiEnrichmentClient,
    call_id: &str,
    packets: &[String],
) -> Result<Sentiment, RunError> {
    store.set_status(call_id, CallStatus::ProcessingAi).await?;

    let enriched = client.analyze(packets).await?;
    let sentiment = enriched.analysis.sentiment;
    debug!(call_id, attempts = enriched.attempts, "Enrichment analysis returned");

    store
        .save_result(call_id, &enriched.analysis.transcription, sentiment)
        .await?;
    Ok(sentiment)
}
