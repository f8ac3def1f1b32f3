// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use countersign_core::config::EngineConfig;

/// Countersign server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Shared secret the external cron presents to trigger a sweep
    pub scheduler_secret: String,
    /// Root of the filesystem blob store
    pub data_dir: PathBuf,
    /// Whether the background finalization retry worker runs
    pub finalize_retry_enabled: bool,
    /// How often the retry worker polls
    pub finalize_retry_interval: Duration,
    /// Engine tunables
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `COUNTERSIGN_DATABASE_URL`: `sqlite:` or `postgres://` connection string
    /// - `COUNTERSIGN_SCHEDULER_SECRET`: guards `POST /internal/scheduler/sweep`
    ///
    /// Optional (with defaults):
    /// - `COUNTERSIGN_HTTP_PORT`: HTTP port (default: 8080)
    /// - `COUNTERSIGN_DATA_DIR`: blob store root (default: .data)
    /// - `COUNTERSIGN_FINALIZE_RETRY_ENABLED`: "true" or "1" (default: false)
    /// - `COUNTERSIGN_FINALIZE_RETRY_INTERVAL_SECS`: (default: 60)
    ///
    /// Engine tunables are read by [`EngineConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("COUNTERSIGN_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("COUNTERSIGN_DATABASE_URL"))?;
        if !(database_url.starts_with("sqlite:") || database_url.starts_with("postgres")) {
            return Err(ConfigError::Invalid(
                "COUNTERSIGN_DATABASE_URL",
                "must start with sqlite: or postgres://",
            ));
        }

        let scheduler_secret = std::env::var("COUNTERSIGN_SCHEDULER_SECRET")
            .map_err(|_| ConfigError::Missing("COUNTERSIGN_SCHEDULER_SECRET"))?;
        if scheduler_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "COUNTERSIGN_SCHEDULER_SECRET",
                "must not be empty",
            ));
        }

        let http_port: u16 = std::env::var("COUNTERSIGN_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("COUNTERSIGN_HTTP_PORT", "must be a valid port number")
            })?;

        let data_dir = std::env::var("COUNTERSIGN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".data"));

        let finalize_retry_enabled = std::env::var("COUNTERSIGN_FINALIZE_RETRY_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let interval_secs: u64 = std::env::var("COUNTERSIGN_FINALIZE_RETRY_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "COUNTERSIGN_FINALIZE_RETRY_INTERVAL_SECS",
                    "must be a positive integer",
                )
            })?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "COUNTERSIGN_FINALIZE_RETRY_INTERVAL_SECS",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            scheduler_secret,
            data_dir,
            finalize_retry_enabled,
            finalize_retry_interval: Duration::from_secs(interval_secs),
            engine: EngineConfig::from_env(),
        })
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
