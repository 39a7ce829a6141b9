//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment overrides (`HOST`, `PORT`, `DATABASE_URL`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_ENRICHMENT__FAILURE_RATE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Sections:
//! - **server**: HTTP bind address
//! - **database**: call store location and pool size
//! - **enrichment**: trigger threshold, retry schedule and mock AI behaviour

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Database URL that selects the in-process call store instead of SQLite.
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Call store settings.
///
/// ## Fields:
/// - `url`: sqlx SQLite URL (`sqlite://calls.db?mode=rwc`), or `memory` for a
///   non-durable in-process store
/// - `max_connections`: size of the process-wide connection pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Background enrichment tuning.
///
/// ## Fields:
/// - `packet_threshold`: accepted packets that trigger enrichment (exactly once per call)
/// - `max_attempts`: total attempts against the AI capability, including the first
/// - `backoff_unit_ms`: length of one backoff unit; delays are 1, 2, 4, 8, ... units
/// - `max_backoff_units`: cap on a single delay, in units
/// - `failure_rate`: probability that one mock AI attempt fails transiently
/// - `min_latency_ms` / `max_latency_ms`: mock AI response time range
/// - `shutdown_grace_ms`: how long shutdown waits for in-flight enrichment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentConfig {
    pub packet_threshold: i64,
    pub max_attempts: u32,
    pub backoff_unit_ms: u64,
    pub max_backoff_units: u32,
    pub failure_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            packet_threshold: 10,
            max_attempts: 5,
            backoff_unit_ms: 1000,
            max_backoff_units: 10,
            failure_rate: 0.25,
            min_latency_ms: 1000,
            max_latency_ms: 3000,
            shutdown_grace_ms: 5000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://calls.db?mode=rwc".to_string(),
                max_connections: 5,
            },
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_ENRICHMENT__PACKET_THRESHOLD=20`: Trigger enrichment later
    /// - `HOST=0.0.0.0`, `PORT=3000`: Special cases for deployment platforms
    /// - `DATABASE_URL=sqlite:///data/calls.db`: Point the call store elsewhere
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections so field names keep their own underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(url) = env::var("DATABASE_URL") {
            settings = settings.set_override("database.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow::anyhow!("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "Database max connections must be greater than 0"
            ));
        }

        self.enrichment.validate()
    }

    /// Whether the call store should live in process memory.
    pub fn uses_memory_store(&self) -> bool {
        self.database.url == MEMORY_DATABASE_URL
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.packet_threshold <= 0 {
            return Err(anyhow::anyhow!("Packet threshold must be greater than 0"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("Max attempts must be greater than 0"));
        }

        if self.backoff_unit_ms == 0 {
            return Err(anyhow::anyhow!("Backoff unit must be greater than 0"));
        }

        if self.max_backoff_units == 0 {
            return Err(anyhow::anyhow!("Max backoff units must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(anyhow::anyhow!(
                "Failure rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            ));
        }

        if self.min_latency_ms > self.max_latency_ms {
            return Err(anyhow::anyhow!(
                "Min latency ({}ms) cannot exceed max latency ({}ms)",
                self.min_latency_ms,
                self.max_latency_ms
            ));
        }

        Ok(())
    }
}
