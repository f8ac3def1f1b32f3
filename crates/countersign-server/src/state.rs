// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use countersign_core::SigningRuntime;
use subtle::ConstantTimeEq;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<SigningRuntime>,
    scheduler_secret: Arc<str>,
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("runtime", &self.runtime)
            .field("scheduler_secret", &"...")
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl AppState {
    pub fn new(runtime: Arc<SigningRuntime>, scheduler_secret: impl Into<Arc<str>>) -> Self {
        Self {
            runtime,
            scheduler_secret: scheduler_secret.into(),
            started_at: Utc::now(),
        }
    }

    /// Compare a presented scheduler secret in constant time.
    pub fn scheduler_secret_matches(&self, presented: &str) -> bool {
        bool::from(
            self.scheduler_secret
                .as_bytes()
                .ct_eq(presented.as_bytes()),
        )
    }
}
