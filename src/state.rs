//! # Application State Management
//!
//! Shared state handed to every HTTP request handler.
//!
//! ## What lives here:
//! - **Configuration**: loaded once at startup, read-only afterwards
//! - **Call store**: process-wide storage handle (SQLite pool or in-memory map),
//!   created at startup and closed at shutdown
//! - **Ingestion + coordinator**: the packet pipeline and its background enrichment
//! - **Request metrics**: counters updated by middleware and the ingestion handler
//!
//! ## Thread Safety:
//! Components are shared behind `Arc`. Request metrics are the only mutable data
//! owned here and sit behind an `Arc<RwLock<_>>`; call state is mutated only through
//! the store's atomic operations.

use crate::calls::ingest::{Ingested, PacketOrder};
use crate::calls::store::{CallStore, MemoryCallStore, SqliteCallStore};
use crate::calls::PacketIngestion;
use crate::config::AppConfig;
use crate::enrichment::{
    AiEnrichmentClient, EnrichmentCapability, EnrichmentCoordinator, MockAiCapability,
    RetryPolicy,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub store: Arc<dyn CallStore>,
    pub ingestion: Arc<PacketIngestion>,
    pub coordinator: Arc<EnrichmentCoordinator>,
    /// Kept so the pool can be closed on shutdown; `None` for the memory store
    sqlite: Option<SqliteCallStore>,
}

/// Request and packet counters collected since startup.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub packets_accepted: u64,
    /// Duplicate or late packets that did not advance their call
    pub packets_out_of_order: u64,
    pub gaps_detected: u64,
    pub enrichments_triggered: u64,
    /// Key: endpoint name (e.g., "POST /v1/call/stream/{call_id}")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Open the configured call store and wire the pipeline on top of it.
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let capability = Arc::new(MockAiCapability::from_config(&config.enrichment));

        if config.uses_memory_store() {
            info!("Using in-memory call store (not durable)");
            let store = Arc::new(MemoryCallStore::new());
            return Ok(Self::assemble(config, store, capability, None));
        }

        info!(url = %config.database.url, "Opening call store");
        let sqlite =
            SqliteCallStore::connect(&config.database.url, config.database.max_connections)
                .await
                .with_context(|| format!("Failed to open call store at {}", config.database.url))?;

        let store = Arc::new(sqlite.clone());
        Ok(Self::assemble(config, store, capability, Some(sqlite)))
    }

    /// Build state around an existing store and capability.
    #[cfg(test)]
    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn CallStore>,
        capability: Arc<dyn EnrichmentCapability>,
    ) -> Self {
        Self::assemble(config, store, capability, None)
    }

    fn assemble(
        config: AppConfig,
        store: Arc<dyn CallStore>,
        capability: Arc<dyn EnrichmentCapability>,
        sqlite: Option<SqliteCallStore>,
    ) -> Self {
        let client = Arc::new(AiEnrichmentClient::new(
            capability,
            RetryPolicy::from_config(&config.enrichment),
        ));
        // Enrichment runs on the runtime building the state (the main one), not on
        // whichever HTTP worker happens to trigger them.
        let coordinator = Arc::new(EnrichmentCoordinator::new(
            store.clone(),
            client,
            Handle::current(),
        ));
        let ingestion = Arc::new(PacketIngestion::new(
            store.clone(),
            coordinator.clone(),
            config.enrichment.packet_threshold,
        ));

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            store,
            ingestion,
            coordinator,
            sqlite,
        }
    }

    /// Drain background enrichment, then release the storage pool.
    pub async fn shutdown(&self) {
        let grace = Duration::from_millis(self.config.enrichment.shutdown_grace_ms);
        let aborted = self.coordinator.shutdown(grace).await;
        info!(aborted, "Enrichment coordinator stopped");

        if let Some(sqlite) = &self.sqlite {
            sqlite.close().await;
            info!("Call store pool closed");
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one accepted packet and what ingesting it did.
    pub fn record_packet(&self, ingested: &Ingested) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.packets_accepted += 1;
        if !ingested.advanced {
            metrics.packets_out_of_order += 1;
        }
        if matches!(ingested.order, PacketOrder::Gap { .. }) {
            metrics.gaps_detected += 1;
        }
        if ingested.enrichment_triggered {
            metrics.enrichments_triggered += 1;
        }
    }

    /// Copy of the current metrics, so no lock is held while a response is built.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::AudioPacket;
    use crate::config::MEMORY_DATABASE_URL;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = MEMORY_DATABASE_URL.to_string();
        config
    }

    #[tokio::test]
    async fn test_initialize_memory_store() {
        let state = AppState::initialize(memory_config()).await.unwrap();
        assert!(state.sqlite.is_none());
        assert!(state.store.get("X").await.unwrap().is_none());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_sqlite_store() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;

        let state = AppState::initialize(config).await.unwrap();
        let call = state.store.get_or_create("X").await.unwrap();
        assert_eq!(call.packet_count, 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let state = AppState::initialize(memory_config()).await.unwrap();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_packet_metrics() {
        let state = AppState::initialize(memory_config()).await.unwrap();
        for sequence in [1, 4, 2] {
            let packet = AudioPacket {
                sequence,
                data: "x".to_string(),
                timestamp: 0.0,
            };
            let ingested = state.ingestion.ingest("X", &packet).await.unwrap();
            state.record_packet(&ingested);
        }

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.packets_accepted, 3);
        assert_eq!(snapshot.packets_out_of_order, 1);
        assert_eq!(snapshot.gaps_detected, 1);
        assert_eq!(snapshot.enrichments_triggered, 0);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
