// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Countersign Server
//!
//! HTTP front end for [`countersign_core`]:
//! - owner operations under `/api/v1/groups` (owner from `X-Owner-Id`)
//! - recipient links under `/api/v1/links`
//! - `POST /internal/scheduler/sweep` for the external cron
//! - an optional background worker retrying failed artifact assembly

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod server;
pub mod state;
pub mod worker;

pub use api::create_router;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
