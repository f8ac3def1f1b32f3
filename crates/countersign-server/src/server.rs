// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server wiring: database, runtime, HTTP listener and background worker.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use countersign_core::SigningRuntime;
use countersign_core::collaborators::fs::FsBlobStore;
use countersign_core::migrations;
use countersign_core::persistence::Persistence;
use countersign_core::persistence::postgres::PostgresPersistence;
use countersign_core::persistence::sqlite::SqlitePersistence;

use crate::api::create_router;
use crate::config::Config;
use crate::state::AppState;
use crate::worker::{FinalizeRetryWorker, FinalizeRetryWorkerConfig};

/// Connect to the configured database, run migrations and build the runtime.
pub async fn build_runtime(config: &Config) -> anyhow::Result<SigningRuntime> {
    // 1. Persistence
    let persistence: Arc<dyn Persistence> = if config.is_sqlite() {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        migrations::run_sqlite(&pool).await?;
        info!("Connected to SQLite");
        Arc::new(SqlitePersistence::new(pool))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        info!("Connected to PostgreSQL");
        Arc::new(PostgresPersistence::new(pool))
    };

    // 2. Blob store under the data dir
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let blob_store = Arc::new(FsBlobStore::new(&config.data_dir));

    // 3. Runtime with the default notifier and manifest assembler
    SigningRuntime::builder()
        .persistence(persistence)
        .blob_store(blob_store)
        .config(config.engine.clone())
        .build()
}

/// Serve HTTP until Ctrl+C, then stop the retry worker.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let runtime = Arc::new(build_runtime(&config).await?);

    let worker = Arc::new(FinalizeRetryWorker::new(
        runtime.finalizer().clone(),
        FinalizeRetryWorkerConfig {
            enabled: config.finalize_retry_enabled,
            poll_interval: config.finalize_retry_interval,
        },
    ));
    let worker_shutdown = worker.shutdown_handle();
    let worker_task = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    let state = AppState::new(runtime, config.scheduler_secret.as_str());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_shutdown.notify_one();
    if let Err(e) = worker_task.await {
        warn!(error = %e, "Finalization retry worker task failed");
    }

    info!("Countersign server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
