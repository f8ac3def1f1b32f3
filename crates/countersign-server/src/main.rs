// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Countersign Server - multi-party signature workflows over HTTP.

use tracing::{info, warn};

use countersign_server::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "countersign_server=info,countersign_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        data_dir = %config.data_dir.display(),
        sqlite = config.is_sqlite(),
        finalize_retry_enabled = config.finalize_retry_enabled,
        "Starting Countersign server"
    );

    countersign_server::server::run(config).await
}
