// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sweep trigger for the external cron.

use axum::Json;
use axum::extract::State;
use tracing::info;

use countersign_core::scheduler::SweepReport;

use crate::error::ApiResult;
use crate::extract::SchedulerAuth;
use crate::state::AppState;

/// Run one reminder/expiration sweep, including finalization retry.
pub async fn run_sweep(
    State(state): State<AppState>,
    _auth: SchedulerAuth,
) -> ApiResult<Json<SweepReport>> {
    let report = state.runtime.scheduler().sweep().await?;
    info!(
        groups_scanned = report.groups_scanned,
        reminders_sent = report.reminders_sent,
        entries_expired = report.entries_expired,
        "Sweep triggered over HTTP"
    );
    Ok(Json(report))
}
