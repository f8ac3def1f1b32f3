// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::CoreError;
use crate::model::{LedgerEntry, RequestGroup};

use super::{
    DeclineWrite, DelegationWrite, EntryRecord, GroupRecord, Persistence, ReassignWrite,
    SignatureOutcome, SignatureWrite, ViewWrite, encode_entry, encode_group,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Guarded touch of the group row; first statement of every mutating transaction.
async fn lock_open_group(
    tx: &mut Transaction<'_, Sqlite>,
    group_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE signing_groups
        SET updated_at = ?1
        WHERE group_id = ?2 AND status = 'pending_signature'
        "#,
    )
    .bind(now)
    .bind(group_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_group(
        &self,
        group: &RequestGroup,
        entries: &[LedgerEntry],
    ) -> Result<(), CoreError> {
        let encoded = encode_group(group)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO signing_groups (
                group_id, owner_id, owner_name, owner_email, title,
                signing_order, view_mode, status, documents, due_at, hard_cutoff,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
            "#,
        )
        .bind(&group.group_id)
        .bind(&group.owner.id)
        .bind(&group.owner.name)
        .bind(&group.owner.email)
        .bind(&group.title)
        .bind(group.signing_order.as_str())
        .bind(group.view_mode.as_str())
        .bind(group.status.as_str())
        .bind(&encoded.documents)
        .bind(group.expiration_policy.due_at)
        .bind(group.expiration_policy.hard_cutoff)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            let encoded = encode_entry(entry)?;
            sqlx::query(
                r#"
                INSERT INTO recipient_entries (
                    entry_id, group_id, recipient_index, link_id, name, email, role,
                    fields, status, signed_documents, signed_payload,
                    access_code_hash, require_verification, due_at,
                    created_at, issued_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15, ?15)
                "#,
            )
            .bind(&entry.entry_id)
            .bind(&entry.group_id)
            .bind(entry.recipient_index as i32)
            .bind(&entry.link_id)
            .bind(&entry.identity.name)
            .bind(&entry.identity.email)
            .bind(&entry.identity.role)
            .bind(&encoded.fields)
            .bind(entry.status.as_str())
            .bind(&encoded.signed_documents)
            .bind(&encoded.signed_payload)
            .bind(&entry.access_policy.access_code_hash)
            .bind(entry.access_policy.require_verification)
            .bind(entry.access_policy.due_at)
            .bind(entry.timestamps.created_at.unwrap_or(group.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>, CoreError> {
        let record = sqlx::query_as::<_, GroupRecord>(
            r#"
            SELECT * FROM signing_groups WHERE group_id = ?
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_entries(&self, group_id: &str) -> Result<Vec<EntryRecord>, CoreError> {
        let records = sqlx::query_as::<_, EntryRecord>(
            r#"
            SELECT * FROM recipient_entries
            WHERE group_id = ?
            ORDER BY recipient_index ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn get_entry(&self, entry_id: &str) -> Result<Option<EntryRecord>, CoreError> {
        let record = sqlx::query_as::<_, EntryRecord>(
            r#"
            SELECT * FROM recipient_entries WHERE entry_id = ?
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_entry_by_link(&self, link_id: &str) -> Result<Option<EntryRecord>, CoreError> {
        let record = sqlx::query_as::<_, EntryRecord>(
            r#"
            SELECT * FROM recipient_entries
            WHERE link_id = ?1 OR delegate_link_id = ?1
               OR entry_id = (SELECT entry_id FROM retired_links WHERE link_id = ?1)
            "#,
        )
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_open_groups(
        &self,
        after_group_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GroupRecord>, CoreError> {
        let records = sqlx::query_as::<_, GroupRecord>(
            r#"
            SELECT * FROM signing_groups
            WHERE status = 'pending_signature'
              AND (?1 IS NULL OR group_id > ?1)
            ORDER BY group_id ASC
            LIMIT ?2
            "#,
        )
        .bind(after_group_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn delete_group(&self, group_id: &str) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM notification_marks
            WHERE subject_id = ?1
               OR subject_id IN (SELECT entry_id FROM recipient_entries WHERE group_id = ?1)
            "#,
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM retired_links
            WHERE entry_id IN (SELECT entry_id FROM recipient_entries WHERE group_id = ?1)
            "#,
        )
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM recipient_entries WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM signing_groups WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_view(&self, write: &ViewWrite<'_>) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, write.group_id, write.now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = ?1,
                viewed_at = COALESCE(viewed_at, ?2),
                updated_at = ?2
            WHERE entry_id = ?3 AND status = ?4
            "#,
        )
        .bind(write.new_status.as_str())
        .bind(write.now)
        .bind(write.entry_id)
        .bind(write.expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_signature(
        &self,
        write: &SignatureWrite<'_>,
    ) -> Result<SignatureOutcome, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, write.group_id, write.now).await? {
            tx.rollback().await?;
            return Ok(SignatureOutcome::default());
        }

        let signed_at = write.fully_signed.then_some(write.now);
        let verified_at = write.verified.then_some(write.now);
        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = ?1,
                signed_documents = ?2,
                signed_payload = ?3,
                signed_at = COALESCE(?4, signed_at),
                verified_at = COALESCE(?5, verified_at),
                verification_code_hash = NULL,
                verification_expires_at_ms = NULL,
                updated_at = ?6
            WHERE entry_id = ?7 AND status = ?8 AND signed_documents = ?9
            "#,
        )
        .bind(write.new_status.as_str())
        .bind(write.signed_documents)
        .bind(write.signed_payload)
        .bind(signed_at)
        .bind(verified_at)
        .bind(write.now)
        .bind(write.entry_id)
        .bind(write.expected_status.as_str())
        .bind(write.expected_signed_documents)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SignatureOutcome::default());
        }

        let mut activated = false;
        if let Some(index) = write.activate_index {
            let result = sqlx::query(
                r#"
                UPDATE recipient_entries
                SET status = 'pending', issued_at = ?1, updated_at = ?1
                WHERE group_id = ?2 AND recipient_index = ?3 AND status = 'awaiting_turn'
                "#,
            )
            .bind(write.now)
            .bind(write.group_id)
            .bind(index as i32)
            .execute(&mut *tx)
            .await?;
            activated = result.rows_affected() == 1;
        }

        tx.commit().await?;
        Ok(SignatureOutcome {
            applied: true,
            activated,
        })
    }

    async fn record_decline(
        &self,
        write: &DeclineWrite<'_>,
    ) -> Result<Option<Vec<EntryRecord>>, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, write.group_id, write.now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = 'declined', decline_reason = ?1, declined_at = ?2, updated_at = ?2
            WHERE entry_id = ?3 AND status = ?4
            "#,
        )
        .bind(write.reason)
        .bind(write.now)
        .bind(write.entry_id)
        .bind(write.expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let siblings = sqlx::query_as::<_, EntryRecord>(
            r#"
            SELECT * FROM recipient_entries
            WHERE group_id = ?1 AND entry_id != ?2
              AND status NOT IN ('signed', 'declined', 'cancelled')
            ORDER BY recipient_index ASC
            "#,
        )
        .bind(write.group_id)
        .bind(write.entry_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = 'cancelled', cancel_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE group_id = ?3 AND entry_id != ?4
              AND status NOT IN ('signed', 'declined', 'cancelled')
            "#,
        )
        .bind(write.cancel_reason)
        .bind(write.now)
        .bind(write.group_id)
        .bind(write.entry_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE signing_groups
            SET status = 'declined', status_reason = ?1, declined_at = ?2, updated_at = ?2
            WHERE group_id = ?3
            "#,
        )
        .bind(write.cancel_reason)
        .bind(write.now)
        .bind(write.group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(siblings))
    }

    async fn record_delegation(&self, write: &DelegationWrite<'_>) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, write.group_id, write.now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = 'delegated',
                delegate_name = ?1,
                delegate_email = ?2,
                delegate_role = ?3,
                delegate_link_id = ?4,
                delegated_at = ?5,
                issued_at = ?5,
                updated_at = ?5
            WHERE entry_id = ?6 AND status = ?7
            "#,
        )
        .bind(&write.delegate.name)
        .bind(&write.delegate.email)
        .bind(&write.delegate.role)
        .bind(write.delegate_link_id)
        .bind(write.now)
        .bind(write.entry_id)
        .bind(write.expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_reassignment(&self, write: &ReassignWrite<'_>) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, write.group_id, write.now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET name = ?1,
                email = ?2,
                role = ?3,
                link_id = ?4,
                status = ?5,
                reassignments = ?6,
                access_code_hash = NULL,
                delegate_name = NULL,
                delegate_email = NULL,
                delegate_role = NULL,
                delegate_link_id = NULL,
                delegated_at = NULL,
                viewed_at = NULL,
                verification_code_hash = NULL,
                verification_expires_at_ms = NULL,
                verified_at = NULL,
                issued_at = ?7,
                updated_at = ?7
            WHERE entry_id = ?8 AND status = ?9 AND link_id = ?10
            "#,
        )
        .bind(&write.identity.name)
        .bind(&write.identity.email)
        .bind(&write.identity.role)
        .bind(write.new_link_id)
        .bind(write.new_status.as_str())
        .bind(write.reassignments)
        .bind(write.now)
        .bind(write.entry_id)
        .bind(write.expected_status.as_str())
        .bind(write.expected_link_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO retired_links (link_id, entry_id, retired_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(write.expected_link_id)
        .bind(write.entry_id)
        .bind(write.now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_expired(
        &self,
        group_id: &str,
        entry_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, group_id, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET expired_at = ?1, updated_at = ?1
            WHERE entry_id = ?2 AND expired_at IS NULL
              AND status NOT IN ('signed', 'declined', 'cancelled')
            "#,
        )
        .bind(now)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn store_verification_challenge(
        &self,
        group_id: &str,
        entry_id: &str,
        code_hash: &str,
        expires_at_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, group_id, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE recipient_entries
            SET verification_code_hash = ?1,
                verification_expires_at_ms = ?2,
                updated_at = ?3
            WHERE entry_id = ?4 AND status IN ('pending', 'viewed', 'delegated')
            "#,
        )
        .bind(code_hash)
        .bind(expires_at_ms)
        .bind(now)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_group(
        &self,
        group_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<EntryRecord>>, CoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_open_group(&mut tx, group_id, now).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let affected = sqlx::query_as::<_, EntryRecord>(
            r#"
            SELECT * FROM recipient_entries
            WHERE group_id = ? AND status NOT IN ('signed', 'declined', 'cancelled')
            ORDER BY recipient_index ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE recipient_entries
            SET status = 'cancelled', cancel_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE group_id = ?3 AND status NOT IN ('signed', 'declined', 'cancelled')
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE signing_groups
            SET status = 'cancelled', status_reason = ?1, cancelled_at = ?2, updated_at = ?2
            WHERE group_id = ?3
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(affected))
    }

    async fn claim_completion(
        &self,
        group_id: &str,
        now: DateTime<Utc>,
        claim_until_ms: i64,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE signing_groups
            SET status = 'completed',
                completed_at = ?1,
                finalize_claim_until_ms = ?2,
                updated_at = ?1
            WHERE group_id = ?3
              AND status = 'pending_signature'
              AND EXISTS (SELECT 1 FROM recipient_entries WHERE group_id = ?3)
              AND NOT EXISTS (
                  SELECT 1 FROM recipient_entries
                  WHERE group_id = ?3 AND status != 'signed'
              )
            "#,
        )
        .bind(now)
        .bind(claim_until_ms)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_finalization(
        &self,
        group_id: &str,
        now_ms: i64,
        claim_until_ms: i64,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE signing_groups
            SET finalize_claim_until_ms = ?1
            WHERE group_id = ?2
              AND status = 'completed'
              AND artifact_ref IS NULL
              AND (finalize_claim_until_ms IS NULL OR finalize_claim_until_ms < ?3)
              AND (next_finalize_at_ms IS NULL OR next_finalize_at_ms <= ?3)
            "#,
        )
        .bind(claim_until_ms)
        .bind(group_id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn store_artifact(
        &self,
        group_id: &str,
        artifact_ref: &str,
        document_artifacts: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE signing_groups
            SET artifact_ref = ?1,
                document_artifacts = ?2,
                finalize_claim_until_ms = NULL,
                next_finalize_at_ms = NULL,
                finalize_error = NULL,
                updated_at = ?3
            WHERE group_id = ?4 AND status = 'completed' AND artifact_ref IS NULL
            "#,
        )
        .bind(artifact_ref)
        .bind(document_artifacts)
        .bind(now)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_finalization_failure(
        &self,
        group_id: &str,
        attempts: u32,
        error: &str,
        next_attempt_at_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE signing_groups
            SET finalize_attempts = ?1,
                finalize_error = ?2,
                next_finalize_at_ms = ?3,
                finalize_claim_until_ms = NULL,
                updated_at = ?4
            WHERE group_id = ?5 AND artifact_ref IS NULL
            "#,
        )
        .bind(attempts as i32)
        .bind(error)
        .bind(next_attempt_at_ms)
        .bind(now)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_groups_awaiting_artifact(
        &self,
        now_ms: i64,
        limit: i64,
    ) -> Result<Vec<GroupRecord>, CoreError> {
        let records = sqlx::query_as::<_, GroupRecord>(
            r#"
            SELECT * FROM signing_groups
            WHERE status = 'completed'
              AND artifact_ref IS NULL
              AND (next_finalize_at_ms IS NULL OR next_finalize_at_ms <= ?1)
              AND (finalize_claim_until_ms IS NULL OR finalize_claim_until_ms < ?1)
            ORDER BY completed_at ASC
            LIMIT ?2
            "#,
        )
        .bind(now_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn try_mark(
        &self,
        subject_id: &str,
        mark: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_marks (subject_id, mark, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (subject_id, mark) DO NOTHING
            "#,
        )
        .bind(subject_id)
        .bind(mark)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccessPolicy, ExpirationPolicy, FinalizationState, GroupStatus, Identity,
        LedgerTimestamps, Owner, RecipientStatus, SigningOrder, VerificationState, ViewMode,
    };
    use crate::persistence::{encode_signed_documents, snapshot_from_records};
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        crate::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn sample_group(order: SigningOrder, statuses: &[RecipientStatus]) -> (RequestGroup, Vec<LedgerEntry>) {
        let group_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let entries: Vec<LedgerEntry> = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| LedgerEntry {
                entry_id: Uuid::new_v4().to_string(),
                group_id: group_id.clone(),
                recipient_index: i as u32,
                link_id: Uuid::new_v4().to_string(),
                identity: Identity::signer(format!("Signer {}", i), format!("s{}@example.com", i)),
                assigned_fields: vec![],
                status: *status,
                signed_documents: BTreeSet::new(),
                signed_payload: None,
                timestamps: LedgerTimestamps {
                    created_at: Some(now),
                    ..Default::default()
                },
                decline_reason: None,
                cancel_reason: None,
                access_policy: AccessPolicy::default(),
                verification: VerificationState::default(),
                delegation: None,
                reassignments: Vec::new(),
            })
            .collect();
        let group = RequestGroup {
            group_id,
            owner: Owner {
                id: "owner-1".to_string(),
                name: "Olivia Owner".to_string(),
                email: "owner@example.com".to_string(),
            },
            title: "Lease agreement".to_string(),
            documents: vec![],
            recipients: entries.iter().map(|e| e.entry_id.clone()).collect(),
            signing_order: order,
            view_mode: ViewMode::Isolated,
            status: GroupStatus::PendingSignature,
            status_reason: None,
            artifact_ref: None,
            document_artifacts: BTreeMap::new(),
            expiration_policy: ExpirationPolicy::default(),
            finalization: FinalizationState::default(),
            created_at: now,
            completed_at: None,
            declined_at: None,
            cancelled_at: None,
        };
        (group, entries)
    }

    fn sign_write<'a>(
        group: &'a RequestGroup,
        entry: &'a LedgerEntry,
        empty_docs: &'a str,
        activate_index: Option<u32>,
    ) -> SignatureWrite<'a> {
        SignatureWrite {
            group_id: &group.group_id,
            entry_id: &entry.entry_id,
            expected_status: entry.status,
            expected_signed_documents: empty_docs,
            new_status: RecipientStatus::Signed,
            signed_documents: empty_docs,
            signed_payload: "{}",
            fully_signed: true,
            verified: false,
            activate_index,
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_snapshot() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(
            SigningOrder::Sequential,
            &[RecipientStatus::Pending, RecipientStatus::AwaitingTurn],
        );
        persistence.insert_group(&group, &entries).await.unwrap();

        let record = persistence.get_group(&group.group_id).await.unwrap().unwrap();
        let records = persistence.list_entries(&group.group_id).await.unwrap();
        let snapshot = snapshot_from_records(record, records).unwrap();

        assert_eq!(snapshot.group.status, GroupStatus::PendingSignature);
        assert_eq!(snapshot.group.signing_order, SigningOrder::Sequential);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[1].status, RecipientStatus::AwaitingTurn);
        assert_eq!(snapshot.group.recipients, group.recipients);
    }

    #[tokio::test]
    async fn test_find_entry_by_link() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
        persistence.insert_group(&group, &entries).await.unwrap();

        let found = persistence
            .find_entry_by_link(&entries[0].link_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entry_id, entries[0].entry_id);
        assert!(persistence.find_entry_by_link("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signature_cas_rejects_stale_status() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
        persistence.insert_group(&group, &entries).await.unwrap();
        let empty = encode_signed_documents(&BTreeSet::new()).unwrap();

        let first = persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, None))
            .await
            .unwrap();
        assert!(first.applied);

        let second = persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, None))
            .await
            .unwrap();
        assert!(!second.applied, "second write with stale status must lose");
    }

    #[tokio::test]
    async fn test_signature_activates_successor_once() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(
            SigningOrder::Sequential,
            &[RecipientStatus::Pending, RecipientStatus::AwaitingTurn],
        );
        persistence.insert_group(&group, &entries).await.unwrap();
        let empty = encode_signed_documents(&BTreeSet::new()).unwrap();

        let outcome = persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, Some(1)))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert!(outcome.activated);

        let successor = persistence.get_entry(&entries[1].entry_id).await.unwrap().unwrap();
        assert_eq!(successor.status, "pending");
    }

    #[tokio::test]
    async fn test_decline_cascades_and_resolves_group() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(
            SigningOrder::Any,
            &[RecipientStatus::Pending, RecipientStatus::Pending, RecipientStatus::Pending],
        );
        persistence.insert_group(&group, &entries).await.unwrap();

        let cancelled = persistence
            .record_decline(&DeclineWrite {
                group_id: &group.group_id,
                entry_id: &entries[1].entry_id,
                expected_status: RecipientStatus::Pending,
                reason: "terms are wrong",
                cancel_reason: "declined by Signer 1",
                now: Utc::now(),
            })
            .await
            .unwrap()
            .expect("decline should apply");
        assert_eq!(cancelled.len(), 2);

        let record = persistence.get_group(&group.group_id).await.unwrap().unwrap();
        assert_eq!(record.status, "declined");
        for entry in persistence.list_entries(&group.group_id).await.unwrap() {
            if entry.entry_id == entries[1].entry_id {
                assert_eq!(entry.status, "declined");
            } else {
                assert_eq!(entry.status, "cancelled");
                assert_eq!(entry.cancel_reason.as_deref(), Some("declined by Signer 1"));
            }
        }

        // Group is resolved; further writes are refused by the guard.
        let empty = encode_signed_documents(&BTreeSet::new()).unwrap();
        let outcome = persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, None))
            .await
            .unwrap();
        assert!(!outcome.applied);
    }

    #[tokio::test]
    async fn test_claim_completion_exactly_once() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
        persistence.insert_group(&group, &entries).await.unwrap();
        let now = Utc::now();

        assert!(
            !persistence
                .claim_completion(&group.group_id, now, 0)
                .await
                .unwrap(),
            "cannot complete while an entry is pending"
        );

        let empty = encode_signed_documents(&BTreeSet::new()).unwrap();
        persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, None))
            .await
            .unwrap();

        assert!(persistence.claim_completion(&group.group_id, now, 0).await.unwrap());
        assert!(!persistence.claim_completion(&group.group_id, now, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_artifact_at_most_once() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
        persistence.insert_group(&group, &entries).await.unwrap();
        let empty = encode_signed_documents(&BTreeSet::new()).unwrap();
        persistence
            .record_signature(&sign_write(&group, &entries[0], &empty, None))
            .await
            .unwrap();
        let now = Utc::now();
        assert!(persistence.claim_completion(&group.group_id, now, 0).await.unwrap());

        assert!(
            persistence
                .store_artifact(&group.group_id, "blob-1", None, now)
                .await
                .unwrap()
        );
        assert!(
            !persistence
                .store_artifact(&group.group_id, "blob-2", None, now)
                .await
                .unwrap()
        );
        let record = persistence.get_group(&group.group_id).await.unwrap().unwrap();
        assert_eq!(record.artifact_ref.as_deref(), Some("blob-1"));
    }

    #[tokio::test]
    async fn test_try_mark_inserts_once() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let now = Utc::now();
        assert!(persistence.try_mark("entry-1", "reminder:3d", now).await.unwrap());
        assert!(!persistence.try_mark("entry-1", "reminder:3d", now).await.unwrap());
        assert!(persistence.try_mark("entry-1", "reminder:7d", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_open_groups_pages_by_id() {
        let persistence = SqlitePersistence::new(test_pool().await);
        for _ in 0..3 {
            let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
            persistence.insert_group(&group, &entries).await.unwrap();
        }

        let first = persistence.list_open_groups(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = persistence
            .list_open_groups(Some(&first[1].group_id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].group_id > first[1].group_id);
    }

    #[tokio::test]
    async fn test_delete_group_removes_entries() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let (group, entries) = sample_group(SigningOrder::Any, &[RecipientStatus::Pending]);
        persistence.insert_group(&group, &entries).await.unwrap();
        persistence
            .try_mark(&entries[0].entry_id, "reminder:3d", Utc::now())
            .await
            .unwrap();

        assert!(persistence.delete_group(&group.group_id).await.unwrap());
        assert!(persistence.get_group(&group.group_id).await.unwrap().is_none());
        assert!(persistence.list_entries(&group.group_id).await.unwrap().is_empty());
        assert!(!persistence.delete_group(&group.group_id).await.unwrap());
    }
}
