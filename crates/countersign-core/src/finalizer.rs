// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion detection and exactly-once finalization.
//!
//! After every `sign` or `decline` the engine hands the group to
//! [`Finalizer::on_resolution`]. When every entry is signed, the caller that
//! wins the completion claim (a conditional update of the group status from
//! `pending_signature` to `completed`) assembles the artifact. Everyone else
//! observes the updated status and does nothing.
//!
//! An assembly failure never rolls the claim back. The failure is recorded
//! with a backoff and [`Finalizer::retry_pending`] picks the group up again;
//! the artifact column is written only while it is still `NULL`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{ArtifactAssembler, NotificationKind};
use crate::completion::aggregate_status;
use crate::config::EngineConfig;
use crate::envelope::signer_records;
use crate::error::CoreError;
use crate::model::{GroupSnapshot, GroupStatus};
use crate::notifications::{NotificationDispatcher, to_owner, to_recipient};
use crate::persistence::{Persistence, load_snapshot};

/// Result of one [`Finalizer::retry_pending`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Groups whose lease was taken.
    pub attempted: usize,
    /// Groups that now have an artifact.
    pub finalized: usize,
    /// Groups whose assembly failed again.
    pub failed: usize,
}

/// Drives the completion claim and artifact assembly.
pub struct Finalizer {
    persistence: Arc<dyn Persistence>,
    assembler: Arc<dyn ArtifactAssembler>,
    dispatcher: NotificationDispatcher,
    config: EngineConfig,
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer")
            .field("persistence", &"...")
            .field("assembler", &"...")
            .field("config", &self.config)
            .finish()
    }
}

fn lease_until(now: DateTime<Utc>, config: &EngineConfig) -> i64 {
    now.timestamp_millis()
        .saturating_add(i64::try_from(config.finalize_lease.as_millis()).unwrap_or(i64::MAX))
}

impl Finalizer {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        assembler: Arc<dyn ArtifactAssembler>,
        dispatcher: NotificationDispatcher,
        config: EngineConfig,
    ) -> Self {
        Self {
            persistence,
            assembler,
            dispatcher,
            config,
        }
    }

    /// Recompute the aggregate after a resolution and finalize if this caller
    /// wins the completion claim.
    ///
    /// Returns the aggregate status as computed from the entries.
    #[instrument(skip_all, fields(group_id = %group_id))]
    pub async fn on_resolution(
        &self,
        group_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupStatus, CoreError> {
        let snapshot = load_snapshot(self.persistence.as_ref(), group_id).await?;
        let aggregate = aggregate_status(&snapshot.statuses());
        if aggregate != GroupStatus::Completed {
            return Ok(aggregate);
        }

        let claimed = self
            .persistence
            .claim_completion(group_id, now, lease_until(now, &self.config))
            .await?;
        if !claimed {
            debug!("Completion already claimed");
            return Ok(aggregate);
        }
        info!("Group completed, finalizing");

        // Re-read so the snapshot carries completed_at.
        let snapshot = load_snapshot(self.persistence.as_ref(), group_id).await?;
        self.finalize_claimed(&snapshot, now).await;
        Ok(aggregate)
    }

    /// Assemble and store the artifact of a group whose lease is held.
    ///
    /// Returns true when this call stored the artifact. Failures are recorded
    /// for retry and never propagated.
    pub async fn finalize_claimed(&self, snapshot: &GroupSnapshot, now: DateTime<Utc>) -> bool {
        let group_id = snapshot.group.group_id.as_str();
        match self.assemble(snapshot).await {
            Ok((artifact_ref, document_artifacts)) => {
                let encoded = match document_artifacts.as_ref().map(serde_json::to_string).transpose() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        self.record_failure(snapshot, &CoreError::from(e), now).await;
                        return false;
                    }
                };
                match self
                    .persistence
                    .store_artifact(group_id, &artifact_ref, encoded.as_deref(), now)
                    .await
                {
                    Ok(true) => {
                        info!(group_id = %group_id, artifact_ref = %artifact_ref, "Artifact stored");
                        self.notify_completed(snapshot, &artifact_ref).await;
                        true
                    }
                    Ok(false) => {
                        debug!(group_id = %group_id, "Artifact already stored");
                        false
                    }
                    Err(e) => {
                        self.record_failure(snapshot, &e, now).await;
                        false
                    }
                }
            }
            Err(e) => {
                self.record_failure(snapshot, &e, now).await;
                false
            }
        }
    }

    async fn assemble(
        &self,
        snapshot: &GroupSnapshot,
    ) -> Result<(String, Option<BTreeMap<String, String>>), CoreError> {
        let group = &snapshot.group;
        let mut artifacts = BTreeMap::new();
        for document in &group.documents {
            let signers = signer_records(&snapshot.entries, Some(&document.document_id));
            let artifact = self.assembler.compose(group, document, &signers).await?;
            artifacts.insert(document.document_id.clone(), artifact);
        }

        if group.is_envelope() {
            let signers = signer_records(&snapshot.entries, None);
            let envelope = self
                .assembler
                .compose_envelope(group, &artifacts, &signers)
                .await?;
            Ok((envelope, Some(artifacts)))
        } else {
            let artifact = artifacts
                .into_values()
                .next()
                .ok_or_else(|| CoreError::validation("documents", "group has no documents"))?;
            Ok((artifact, None))
        }
    }

    async fn record_failure(&self, snapshot: &GroupSnapshot, err: &CoreError, now: DateTime<Utc>) {
        let group = &snapshot.group;
        let attempts = group.finalization.attempts.saturating_add(1);
        let backoff = self.config.finalize_backoff(attempts);
        let next_attempt_at_ms = now
            .timestamp_millis()
            .saturating_add(i64::try_from(backoff.as_millis()).unwrap_or(i64::MAX));
        error!(
            group_id = %group.group_id,
            attempts,
            error = %err,
            "Artifact assembly failed, scheduling retry"
        );

        if let Err(e) = self
            .persistence
            .record_finalization_failure(
                &group.group_id,
                attempts,
                &err.to_string(),
                next_attempt_at_ms,
                now,
            )
            .await
        {
            error!(group_id = %group.group_id, error = %e, "Failed to record finalization failure");
            return;
        }

        let mark = format!("finalization_failed:{}", attempts);
        match self.persistence.try_mark(&group.group_id, &mark, now).await {
            Ok(true) => {
                self.dispatcher
                    .dispatch(to_owner(
                        NotificationKind::FinalizationFailed,
                        group,
                        json!({
                            "attempts": attempts,
                            "error": err.to_string(),
                            "next_attempt_at_ms": next_attempt_at_ms,
                        }),
                    ))
                    .await;
            }
            Ok(false) => {}
            Err(e) => warn!(group_id = %group.group_id, error = %e, "Failed to record notification mark"),
        }
    }

    async fn notify_completed(&self, snapshot: &GroupSnapshot, artifact_ref: &str) {
        let group = &snapshot.group;
        let data = json!({ "artifact_ref": artifact_ref });
        let mut notifications = vec![to_owner(NotificationKind::Completed, group, data.clone())];
        notifications.extend(
            snapshot
                .entries
                .iter()
                .map(|entry| to_recipient(NotificationKind::Completed, group, entry, data.clone())),
        );
        self.dispatcher.dispatch_all(notifications).await;
    }

    /// Re-attempt finalization of completed groups still lacking an artifact.
    #[instrument(skip_all)]
    pub async fn retry_pending(&self, now: DateTime<Utc>) -> Result<RetryReport, CoreError> {
        let now_ms = now.timestamp_millis();
        let groups = self
            .persistence
            .list_groups_awaiting_artifact(now_ms, self.config.sweep_batch_size)
            .await?;

        let mut report = RetryReport::default();
        for record in groups {
            let group_id = record.group_id.clone();
            let claimed = match self
                .persistence
                .claim_finalization(&group_id, now_ms, lease_until(now, &self.config))
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(group_id = %group_id, error = %e, "Failed to claim finalization");
                    report.failed += 1;
                    continue;
                }
            };
            if !claimed {
                continue;
            }
            report.attempted += 1;

            let snapshot = match load_snapshot(self.persistence.as_ref(), &group_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!(group_id = %group_id, error = %e, "Failed to load group for retry");
                    report.failed += 1;
                    continue;
                }
            };
            if self.finalize_claimed(&snapshot, now).await {
                report.finalized += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                finalized = report.finalized,
                failed = report.failed,
                "Finalization retry pass finished"
            );
        }
        Ok(report)
    }
}
