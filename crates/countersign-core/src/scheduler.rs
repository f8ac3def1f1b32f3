// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reminder and expiration sweep.
//!
//! There are no timers in the core. An external trigger calls
//! [`ReminderScheduler::sweep`], which pages through open groups and raises
//! the time-based events that are due:
//!
//! - `reminder` N days after the current holder was asked to act (creation,
//!   sequential activation, delegation or reassignment)
//! - `due_warning` N days before the effective due date
//! - `expired` once the due date has passed (annotation only)
//!
//! Every send is preceded by inserting a notification mark; only the caller
//! whose insert succeeds sends, so overlapping sweeps send at most once per
//! threshold and entry. When several thresholds were crossed since the last
//! sweep, only the most relevant one is sent and the others are marked.
//!
//! The sweep also re-runs the completion check on fully signed groups and
//! retries pending finalizations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::collaborators::NotificationKind;
use crate::completion::aggregate_status;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::finalizer::{Finalizer, RetryReport};
use crate::model::{GroupSnapshot, GroupStatus, LedgerEntry};
use crate::notifications::{NotificationDispatcher, acting_link_id, to_owner, to_recipient};
use crate::persistence::{GroupRecord, Persistence, snapshot_from_records};
use crate::transitions::{ActionKind, Actor, transition};

/// Counters of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub groups_scanned: usize,
    pub reminders_sent: usize,
    pub due_warnings_sent: usize,
    pub entries_expired: usize,
    /// Fully signed groups whose completion was claimed by the sweep.
    pub completions_recovered: usize,
    /// Groups that failed and were skipped.
    pub failed_groups: usize,
    pub finalization: RetryReport,
}

/// Externally triggered sweep over open groups.
pub struct ReminderScheduler {
    persistence: Arc<dyn Persistence>,
    dispatcher: NotificationDispatcher,
    finalizer: Arc<Finalizer>,
    config: EngineConfig,
}

impl std::fmt::Debug for ReminderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderScheduler")
            .field("persistence", &"...")
            .field("config", &self.config)
            .finish()
    }
}

/// Mark key of a threshold, scoped to the link that receives it.
fn threshold_mark(kind: NotificationKind, days: u32, link_id: &str) -> String {
    format!("{}:{}d:{}", kind.as_str(), days, link_id)
}

/// When the current holder of a slot was asked to act.
fn issued_at(entry: &LedgerEntry, snapshot: &GroupSnapshot) -> DateTime<Utc> {
    entry
        .timestamps
        .issued_at
        .or(entry.timestamps.created_at)
        .unwrap_or(snapshot.group.created_at)
}

impl ReminderScheduler {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        dispatcher: NotificationDispatcher,
        finalizer: Arc<Finalizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            persistence,
            dispatcher,
            finalizer,
            config,
        }
    }

    /// Run one sweep at the current time.
    pub async fn sweep(&self) -> Result<SweepReport, CoreError> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CoreError> {
        let mut report = SweepReport::default();
        let batch = self.config.sweep_batch_size.max(1);
        let mut after: Option<String> = None;

        loop {
            let page = self
                .persistence
                .list_open_groups(after.as_deref(), batch)
                .await?;
            let page_len = page.len();
            after = page.last().map(|g| g.group_id.clone());

            for record in page {
                let group_id = record.group_id.clone();
                report.groups_scanned += 1;
                if let Err(e) = self.sweep_group(record, now, &mut report).await {
                    error!(group_id = %group_id, error = %e, "Sweep failed for group");
                    report.failed_groups += 1;
                }
            }

            if (page_len as i64) < batch {
                break;
            }
        }

        match self.finalizer.retry_pending(now).await {
            Ok(retry) => report.finalization = retry,
            Err(e) => error!(error = %e, "Finalization retry pass failed"),
        }

        info!(
            groups = report.groups_scanned,
            reminders = report.reminders_sent,
            due_warnings = report.due_warnings_sent,
            expired = report.entries_expired,
            "Sweep finished"
        );
        Ok(report)
    }

    async fn sweep_group(
        &self,
        record: GroupRecord,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        let entries = self.persistence.list_entries(&record.group_id).await?;
        let snapshot = snapshot_from_records(record, entries)?;

        // A signer whose completion check failed leaves a fully signed group open.
        if aggregate_status(&snapshot.statuses()) == GroupStatus::Completed {
            debug!(group_id = %snapshot.group.group_id, "Recovering completion");
            self.finalizer
                .on_resolution(&snapshot.group.group_id, now)
                .await?;
            report.completions_recovered += 1;
            return Ok(());
        }

        for entry in snapshot.entries.iter().filter(|e| !e.status.is_terminal()) {
            if let Some(due) = entry.due_at(&snapshot.group) {
                if now >= due {
                    self.expire_entry(&snapshot, entry, due, now, report).await?;
                    continue;
                }
                self.due_warning(&snapshot, entry, due, now, report).await?;
            }
            self.reminder(&snapshot, entry, now, report).await?;
        }
        Ok(())
    }

    async fn expire_entry(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        transition(entry.status, ActionKind::Expire, Actor::Scheduler)?;
        if entry.timestamps.expired_at.is_some() {
            return Ok(());
        }
        let group = &snapshot.group;
        if !self
            .persistence
            .mark_expired(&group.group_id, &entry.entry_id, now)
            .await?
        {
            return Ok(());
        }
        report.entries_expired += 1;
        info!(entry_id = %entry.entry_id, "Entry expired");

        let data = json!({
            "recipient_index": entry.recipient_index,
            "due_at": due,
            "hard_cutoff": group.expiration_policy.hard_cutoff,
        });
        let mut notifications = vec![to_owner(NotificationKind::Expired, group, data.clone())];
        if entry.status.is_actionable() {
            notifications.push(to_recipient(NotificationKind::Expired, group, entry, data));
        }
        self.dispatcher.dispatch_all(notifications).await;
        Ok(())
    }

    async fn due_warning(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        if !entry.status.is_actionable() {
            return Ok(());
        }
        let mut crossed: Vec<u32> = self
            .config
            .due_warning_days
            .iter()
            .copied()
            .filter(|days| now >= due - Duration::days(i64::from(*days)))
            .collect();
        // Nearest threshold first; that is the one worth sending.
        crossed.sort_unstable();
        crossed.dedup();

        let link_id = acting_link_id(entry);
        for (position, days) in crossed.into_iter().enumerate() {
            let mark = threshold_mark(NotificationKind::DueWarning, days, link_id);
            let first = self
                .persistence
                .try_mark(&entry.entry_id, &mark, now)
                .await?;
            if first && position == 0 {
                report.due_warnings_sent += 1;
                self.dispatcher
                    .dispatch(to_recipient(
                        NotificationKind::DueWarning,
                        &snapshot.group,
                        entry,
                        json!({ "due_at": due, "days_before": days }),
                    ))
                    .await;
            }
        }
        Ok(())
    }

    async fn reminder(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        if !entry.status.is_actionable() {
            return Ok(());
        }
        let issued = issued_at(entry, snapshot);
        let mut crossed: Vec<u32> = self
            .config
            .reminder_after_days
            .iter()
            .copied()
            .filter(|days| now >= issued + Duration::days(i64::from(*days)))
            .collect();
        // Latest threshold first.
        crossed.sort_unstable_by(|a, b| b.cmp(a));
        crossed.dedup();

        let link_id = acting_link_id(entry);
        for (position, days) in crossed.into_iter().enumerate() {
            let mark = threshold_mark(NotificationKind::Reminder, days, link_id);
            let first = self
                .persistence
                .try_mark(&entry.entry_id, &mark, now)
                .await?;
            if first && position == 0 {
                report.reminders_sent += 1;
                self.dispatcher
                    .dispatch(to_recipient(
                        NotificationKind::Reminder,
                        &snapshot.group,
                        entry,
                        json!({
                            "days_since_issued": days,
                            "due_at": entry.due_at(&snapshot.group),
                        }),
                    ))
                    .await;
            }
        }
        Ok(())
    }
}
