// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that retries failed artifact assembly.
//!
//! Picks up groups that are `completed` without an artifact whose backoff has
//! elapsed. The sweep trigger does the same work; this worker exists for
//! deployments without an external cron.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use countersign_core::finalizer::Finalizer;

/// Configuration for the finalization retry worker.
#[derive(Debug, Clone)]
pub struct FinalizeRetryWorkerConfig {
    /// Whether the worker runs.
    pub enabled: bool,
    /// How often to poll.
    pub poll_interval: Duration,
}

impl Default for FinalizeRetryWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Polls [`Finalizer::retry_pending`] until shut down.
pub struct FinalizeRetryWorker {
    finalizer: Arc<Finalizer>,
    config: FinalizeRetryWorkerConfig,
    shutdown: Arc<Notify>,
}

impl FinalizeRetryWorker {
    pub fn new(finalizer: Arc<Finalizer>, config: FinalizeRetryWorkerConfig) -> Self {
        Self {
            finalizer,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop. Returns when the shutdown signal is received.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Finalization retry worker disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Finalization retry worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Finalization retry worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.retry_once().await;
                }
            }
        }

        info!("Finalization retry worker stopped");
    }

    async fn retry_once(&self) {
        match self.finalizer.retry_pending(Utc::now()).await {
            Ok(report) if report.attempted > 0 => info!(
                attempted = report.attempted,
                finalized = report.finalized,
                failed = report.failed,
                "Retried pending finalizations"
            ),
            Ok(_) => debug!("No finalizations pending"),
            Err(e) => error!(error = %e, "Failed to retry pending finalizations"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use countersign_core::SigningRuntime;
    use countersign_core::persistence::sqlite::SqlitePersistence;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn finalizer() -> Arc<Finalizer> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        countersign_core::migrations::run_sqlite(&pool)
            .await
            .expect("migrations");
        let runtime = SigningRuntime::builder()
            .persistence(Arc::new(SqlitePersistence::new(pool)))
            .build()
            .expect("runtime");
        runtime.finalizer().clone()
    }

    #[tokio::test]
    async fn test_disabled_worker_returns_immediately() {
        let worker =
            FinalizeRetryWorker::new(finalizer().await, FinalizeRetryWorkerConfig::default());
        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .expect("disabled worker should not loop");
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let worker = FinalizeRetryWorker::new(
            finalizer().await,
            FinalizeRetryWorkerConfig {
                enabled: true,
                poll_interval: Duration::from_millis(10),
            },
        );
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_one();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker should stop")
            .expect("worker task panicked");
    }
}
