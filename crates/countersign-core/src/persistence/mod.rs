// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for countersign-core.
//!
//! Every mutating operation that touches more than one row runs in a single
//! transaction whose first statement is a guarded update of the group row
//! (`status = 'pending_signature'`). That row acts as the serialization point
//! for a group: concurrent writers queue on it, and a writer that finds the
//! group already resolved rolls back without side effects.
//!
//! Single-entry updates are compare-and-swap on the expected status; the
//! boolean results report whether the swap was applied.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{
    AccessPolicy, Delegation, DocumentRef, ExpirationPolicy, FieldPlacement, FinalizationState,
    GroupSnapshot, GroupStatus, Identity, LedgerEntry, LedgerTimestamps, Owner, Reassignment,
    RecipientStatus, RequestGroup, SignedPayload, SigningOrder, VerificationState, ViewMode,
};

/// Group row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupRecord {
    /// Unique identifier for the group.
    pub group_id: String,
    /// Owning account.
    pub owner_id: String,
    /// Owner display name.
    pub owner_name: String,
    /// Owner notification address.
    pub owner_email: String,
    /// Subject line.
    pub title: String,
    /// `any` or `sequential`.
    pub signing_order: String,
    /// `isolated` or `shared`.
    pub view_mode: String,
    /// Aggregate status (pending_signature, completed, declined, cancelled).
    pub status: String,
    /// Why the group was declined or cancelled.
    pub status_reason: Option<String>,
    /// JSON array of document references.
    pub documents: String,
    /// Group due date.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether the due date is a hard cutoff.
    pub hard_cutoff: bool,
    /// Finalized artifact, set at most once.
    pub artifact_ref: Option<String>,
    /// JSON object of per-document artifacts.
    pub document_artifacts: Option<String>,
    /// Failed finalization attempts.
    pub finalize_attempts: i32,
    /// Last finalization error.
    pub finalize_error: Option<String>,
    /// Earliest next finalization attempt (epoch millis).
    pub next_finalize_at_ms: Option<i64>,
    /// Finalization lease expiry (epoch millis).
    pub finalize_claim_until_ms: Option<i64>,
    /// When the group was created.
    pub created_at: DateTime<Utc>,
    /// Last write to the group row.
    pub updated_at: DateTime<Utc>,
    /// When the group was completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the group was declined.
    pub declined_at: Option<DateTime<Utc>>,
    /// When the group was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Recipient ledger entry row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRecord {
    pub entry_id: String,
    pub group_id: String,
    pub recipient_index: i32,
    pub link_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    /// JSON array of field placements.
    pub fields: String,
    pub status: String,
    /// JSON array of signed document ids.
    pub signed_documents: String,
    /// JSON object of filled values.
    pub signed_payload: Option<String>,
    pub decline_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub access_code_hash: Option<String>,
    pub require_verification: bool,
    pub due_at: Option<DateTime<Utc>>,
    pub verification_code_hash: Option<String>,
    pub verification_expires_at_ms: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub delegate_name: Option<String>,
    pub delegate_email: Option<String>,
    pub delegate_role: Option<String>,
    pub delegate_link_id: Option<String>,
    pub delegated_at: Option<DateTime<Utc>>,
    /// JSON array of reassignments, oldest first.
    pub reassignments: String,
    pub created_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl TryFrom<EntryRecord> for LedgerEntry {
    type Error = CoreError;

    fn try_from(r: EntryRecord) -> Result<Self, Self::Error> {
        let assigned_fields: Vec<FieldPlacement> = serde_json::from_str(&r.fields)
            .map_err(|e| CoreError::decode("fields", e))?;
        let signed_documents: BTreeSet<String> = serde_json::from_str(&r.signed_documents)
            .map_err(|e| CoreError::decode("signed_documents", e))?;
        let signed_payload: Option<SignedPayload> = r
            .signed_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| CoreError::decode("signed_payload", e))?;

        let delegation = match (r.delegate_name, r.delegate_email, r.delegate_link_id, r.delegated_at) {
            (Some(name), Some(email), Some(link_id), Some(delegated_at)) => Some(Delegation {
                delegate: Identity {
                    name,
                    email,
                    role: r.delegate_role.unwrap_or_else(|| r.role.clone()),
                },
                link_id,
                delegated_at,
            }),
            _ => None,
        };

        let reassignments: Vec<Reassignment> = serde_json::from_str(&r.reassignments)
            .map_err(|e| CoreError::decode("reassignments", e))?;

        Ok(LedgerEntry {
            status: RecipientStatus::parse(&r.status)?,
            recipient_index: u32::try_from(r.recipient_index)
                .map_err(|e| CoreError::decode("recipient_index", e))?,
            entry_id: r.entry_id,
            group_id: r.group_id,
            link_id: r.link_id,
            identity: Identity {
                name: r.name,
                email: r.email,
                role: r.role,
            },
            assigned_fields,
            signed_documents,
            signed_payload,
            timestamps: LedgerTimestamps {
                created_at: Some(r.created_at),
                issued_at: Some(r.issued_at),
                viewed_at: r.viewed_at,
                signed_at: r.signed_at,
                declined_at: r.declined_at,
                cancelled_at: r.cancelled_at,
                expired_at: r.expired_at,
            },
            decline_reason: r.decline_reason,
            cancel_reason: r.cancel_reason,
            access_policy: AccessPolicy {
                access_code_hash: r.access_code_hash,
                require_verification: r.require_verification,
                due_at: r.due_at,
            },
            verification: VerificationState {
                code_hash: r.verification_code_hash,
                expires_at_ms: r.verification_expires_at_ms,
                verified_at: r.verified_at,
            },
            delegation,
            reassignments,
        })
    }
}

impl GroupRecord {
    /// Convert into the domain type, given the ordered entry ids.
    pub fn into_group(self, recipients: Vec<String>) -> Result<RequestGroup, CoreError> {
        let documents: Vec<DocumentRef> = serde_json::from_str(&self.documents)
            .map_err(|e| CoreError::decode("documents", e))?;
        let document_artifacts: BTreeMap<String, String> = self
            .document_artifacts
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| CoreError::decode("document_artifacts", e))?
            .unwrap_or_default();

        Ok(RequestGroup {
            signing_order: SigningOrder::parse(&self.signing_order)?,
            view_mode: ViewMode::parse(&self.view_mode)?,
            status: GroupStatus::parse(&self.status)?,
            group_id: self.group_id,
            owner: Owner {
                id: self.owner_id,
                name: self.owner_name,
                email: self.owner_email,
            },
            title: self.title,
            documents,
            recipients,
            status_reason: self.status_reason,
            artifact_ref: self.artifact_ref,
            document_artifacts,
            expiration_policy: ExpirationPolicy {
                due_at: self.due_at,
                hard_cutoff: self.hard_cutoff,
            },
            finalization: FinalizationState {
                attempts: u32::try_from(self.finalize_attempts).unwrap_or(0),
                last_error: self.finalize_error,
                next_attempt_at_ms: self.next_finalize_at_ms,
            },
            created_at: self.created_at,
            completed_at: self.completed_at,
            declined_at: self.declined_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

/// Build a snapshot from a group row and its entry rows.
pub fn snapshot_from_records(
    group: GroupRecord,
    entries: Vec<EntryRecord>,
) -> Result<GroupSnapshot, CoreError> {
    let mut entries = entries
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.recipient_index);
    let recipients = entries.iter().map(|e| e.entry_id.clone()).collect();
    Ok(GroupSnapshot {
        group: group.into_group(recipients)?,
        entries,
    })
}

/// Load a group and all of its entries, or fail with `NotFound`.
pub async fn load_snapshot(
    persistence: &dyn Persistence,
    group_id: &str,
) -> Result<GroupSnapshot, CoreError> {
    let group = persistence
        .get_group(group_id)
        .await?
        .ok_or_else(|| CoreError::not_found("group", group_id))?;
    let entries = persistence.list_entries(group_id).await?;
    snapshot_from_records(group, entries)
}

/// Serialized columns shared by both backends.
pub(crate) struct EncodedGroup {
    pub documents: String,
}

pub(crate) struct EncodedEntry {
    pub fields: String,
    pub signed_documents: String,
    pub signed_payload: Option<String>,
}

pub(crate) fn encode_group(group: &RequestGroup) -> Result<EncodedGroup, CoreError> {
    Ok(EncodedGroup {
        documents: serde_json::to_string(&group.documents)?,
    })
}

pub(crate) fn encode_entry(entry: &LedgerEntry) -> Result<EncodedEntry, CoreError> {
    Ok(EncodedEntry {
        fields: serde_json::to_string(&entry.assigned_fields)?,
        signed_documents: encode_signed_documents(&entry.signed_documents)?,
        signed_payload: entry
            .signed_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    })
}

/// Encoding of a reassignment history.
pub fn encode_reassignments(reassignments: &[Reassignment]) -> Result<String, CoreError> {
    Ok(serde_json::to_string(reassignments)?)
}

/// Canonical encoding of a signed-document set; also used as a CAS guard.
pub fn encode_signed_documents(documents: &BTreeSet<String>) -> Result<String, CoreError> {
    Ok(serde_json::to_string(documents)?)
}

// ============================================================================
// Write descriptors
// ============================================================================

/// Record a `view`.
#[derive(Debug, Clone)]
pub struct ViewWrite<'a> {
    pub group_id: &'a str,
    pub entry_id: &'a str,
    pub expected_status: RecipientStatus,
    pub new_status: RecipientStatus,
    pub now: DateTime<Utc>,
}

/// Record a full or partial signature.
#[derive(Debug, Clone)]
pub struct SignatureWrite<'a> {
    pub group_id: &'a str,
    pub entry_id: &'a str,
    pub expected_status: RecipientStatus,
    /// Encoded signed-document set observed before the write.
    pub expected_signed_documents: &'a str,
    pub new_status: RecipientStatus,
    pub signed_documents: &'a str,
    pub signed_payload: &'a str,
    /// Set when every document is now signed.
    pub fully_signed: bool,
    /// Set when a verification code was consumed.
    pub verified: bool,
    /// Sequential successor to move from `awaiting_turn` to `pending`.
    pub activate_index: Option<u32>,
    pub now: DateTime<Utc>,
}

/// Outcome of [`Persistence::record_signature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignatureOutcome {
    /// Whether the entry update was applied.
    pub applied: bool,
    /// Whether the successor was activated by this write.
    pub activated: bool,
}

/// Record a `decline` and cascade-cancel the siblings.
#[derive(Debug, Clone)]
pub struct DeclineWrite<'a> {
    pub group_id: &'a str,
    pub entry_id: &'a str,
    pub expected_status: RecipientStatus,
    pub reason: &'a str,
    /// Reason stored on every cancelled sibling.
    pub cancel_reason: &'a str,
    pub now: DateTime<Utc>,
}

/// Record a `delegate`.
#[derive(Debug, Clone)]
pub struct DelegationWrite<'a> {
    pub group_id: &'a str,
    pub entry_id: &'a str,
    pub expected_status: RecipientStatus,
    pub delegate: &'a Identity,
    pub delegate_link_id: &'a str,
    pub now: DateTime<Utc>,
}

/// Record an owner reassignment.
#[derive(Debug, Clone)]
pub struct ReassignWrite<'a> {
    pub group_id: &'a str,
    pub entry_id: &'a str,
    pub expected_status: RecipientStatus,
    pub expected_link_id: &'a str,
    pub new_status: RecipientStatus,
    pub identity: &'a Identity,
    pub new_link_id: &'a str,
    /// Encoded history including the reassignment being written.
    pub reassignments: &'a str,
    pub now: DateTime<Utc>,
}

/// Persistence abstraction for the recipient ledger.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    // ========================================================================
    // Groups and entries
    // ========================================================================

    /// Insert a group and all of its entries atomically.
    async fn insert_group(
        &self,
        group: &RequestGroup,
        entries: &[LedgerEntry],
    ) -> Result<(), CoreError>;

    /// Fetch a group row.
    async fn get_group(&self, group_id: &str) -> Result<Option<GroupRecord>, CoreError>;

    /// Fetch every entry of a group ordered by recipient index.
    async fn list_entries(&self, group_id: &str) -> Result<Vec<EntryRecord>, CoreError>;

    /// Fetch a single entry.
    async fn get_entry(&self, entry_id: &str) -> Result<Option<EntryRecord>, CoreError>;

    /// Find the entry a link belongs to: recipient, delegate or any retired link.
    async fn find_entry_by_link(&self, link_id: &str) -> Result<Option<EntryRecord>, CoreError>;

    /// Page through groups still awaiting signatures, keyed by group id.
    async fn list_open_groups(
        &self,
        after_group_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GroupRecord>, CoreError>;

    /// Delete a group, its entries and its notification marks.
    async fn delete_group(&self, group_id: &str) -> Result<bool, CoreError>;

    // ========================================================================
    // Recipient transitions
    // ========================================================================

    /// Apply a `view`. Returns false when the CAS lost.
    async fn record_view(&self, write: &ViewWrite<'_>) -> Result<bool, CoreError>;

    /// Apply a signature and the sequential activation in one transaction.
    async fn record_signature(
        &self,
        write: &SignatureWrite<'_>,
    ) -> Result<SignatureOutcome, CoreError>;

    /// Apply a decline, cancel siblings and resolve the group as declined.
    ///
    /// Returns the siblings as they were before being cancelled, or `None`
    /// when the CAS lost.
    async fn record_decline(
        &self,
        write: &DeclineWrite<'_>,
    ) -> Result<Option<Vec<EntryRecord>>, CoreError>;

    /// Apply a delegation. Returns false when the CAS lost.
    async fn record_delegation(&self, write: &DelegationWrite<'_>) -> Result<bool, CoreError>;

    /// Apply an owner reassignment. Returns false when the CAS lost.
    async fn record_reassignment(&self, write: &ReassignWrite<'_>) -> Result<bool, CoreError>;

    /// Annotate a non-terminal entry as expired, once.
    async fn mark_expired(
        &self,
        group_id: &str,
        entry_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Store a fresh verification challenge on an actionable entry.
    async fn store_verification_challenge(
        &self,
        group_id: &str,
        entry_id: &str,
        code_hash: &str,
        expires_at_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Cancel every non-terminal entry and resolve the group as cancelled.
    ///
    /// Returns the entries as they were before being cancelled, or `None`
    /// when the group was no longer pending.
    async fn cancel_group(
        &self,
        group_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<EntryRecord>>, CoreError>;

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Move the group to `completed` if every entry is signed, taking the
    /// finalization lease. Exactly one caller observes `true`.
    async fn claim_completion(
        &self,
        group_id: &str,
        now: DateTime<Utc>,
        claim_until_ms: i64,
    ) -> Result<bool, CoreError>;

    /// Take the finalization lease of a completed group lacking an artifact.
    async fn claim_finalization(
        &self,
        group_id: &str,
        now_ms: i64,
        claim_until_ms: i64,
    ) -> Result<bool, CoreError>;

    /// Write the artifact reference if none is set yet.
    async fn store_artifact(
        &self,
        group_id: &str,
        artifact_ref: &str,
        document_artifacts: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Record a failed assembly attempt and release the lease.
    async fn record_finalization_failure(
        &self,
        group_id: &str,
        attempts: u32,
        error: &str,
        next_attempt_at_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// Completed groups without an artifact whose retry is due.
    async fn list_groups_awaiting_artifact(
        &self,
        now_ms: i64,
        limit: i64,
    ) -> Result<Vec<GroupRecord>, CoreError>;

    // ========================================================================
    // Notification marks
    // ========================================================================

    /// Insert a mark once. Returns true only for the first insert.
    async fn try_mark(
        &self,
        subject_id: &str,
        mark: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Check database connectivity.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}
