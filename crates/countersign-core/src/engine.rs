// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transition engine: the core-exposed operations.
//!
//! Every recipient action follows the same path:
//!
//! 1. resolve the link to its ledger entry and link role
//! 2. check access code (recipient links only)
//! 3. validate against the transition table in [`crate::transitions`]
//! 4. apply one guarded write (group touch + status-keyed CAS)
//! 5. after commit, fan out notifications and hand `sign`/`decline` to the
//!    [`Finalizer`]
//!
//! A lost compare-and-swap is reported as `StateConflict`; nothing is written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::access::{
    LinkCredentials, LinkRole, check_access_code, check_verification,
    generate_verification_code, hash_secret, resolve_link,
};
use crate::collaborators::{NotificationKind, ViewContext, ViewEvent, ViewTelemetry};
use crate::config::EngineConfig;
use crate::envelope::plan_signature;
use crate::error::CoreError;
use crate::finalizer::Finalizer;
use crate::model::{
    AccessPolicy, DocumentRef, ExpirationPolicy, FieldPlacement, FinalizationState,
    GroupSnapshot, GroupStatus, Identity, LedgerEntry, LedgerTimestamps, Owner, Reassignment,
    RecipientStatus, RequestGroup, SignedPayload, SigningOrder, VerificationState, ViewMode,
};
use crate::notifications::{NotificationDispatcher, to_identity, to_owner, to_recipient};
use crate::ordering::{initial_statuses, next_activation};
use crate::persistence::{
    DeclineWrite, DelegationWrite, EntryRecord, Persistence, ReassignWrite, SignatureWrite,
    ViewWrite, encode_reassignments, encode_signed_documents, load_snapshot,
};
use crate::projection::{GroupSummary, LedgerView, build_view, group_summary};
use crate::transitions::{ActionKind, Actor, transition};

/// Upper bound on recipients per group.
pub const MAX_RECIPIENTS: usize = 100;

/// Minimum length of an access code.
pub const MIN_ACCESS_CODE_LEN: usize = 4;

// ============================================================================
// Requests and responses
// ============================================================================

/// One recipient of a new group.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientInput {
    #[serde(flatten)]
    pub identity: Identity,
    /// Clear-text access code; only its digest is stored.
    #[serde(default)]
    pub access_code: Option<String>,
    /// Require a one-time verification code with `sign`.
    #[serde(default)]
    pub require_verification: bool,
    /// Overrides the group due date for this recipient.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

/// Input of [`SigningEngine::create_group`].
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    pub title: String,
    pub documents: Vec<DocumentRef>,
    /// Recipients in signing order; the position is the recipient index.
    pub recipients: Vec<RecipientInput>,
    #[serde(default)]
    pub fields: Vec<FieldPlacement>,
    #[serde(default)]
    pub signing_order: SigningOrder,
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Refuse `sign`/`view` once the due date has passed.
    #[serde(default)]
    pub hard_cutoff: bool,
}

/// A recipient slot and the link that reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientLink {
    pub entry_id: String,
    pub recipient_index: u32,
    pub email: String,
    pub link_id: String,
    pub status: RecipientStatus,
}

/// Result of [`SigningEngine::create_group`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedGroup {
    pub group_id: String,
    pub status: GroupStatus,
    pub recipients: Vec<RecipientLink>,
}

/// An action submitted through a recipient link.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecipientAction {
    View {
        #[serde(default)]
        context: ViewContext,
    },
    Sign {
        /// Documents to sign; all unsigned documents when omitted.
        #[serde(default)]
        documents: Option<Vec<String>>,
        #[serde(default)]
        values: SignedPayload,
    },
    Decline {
        reason: String,
    },
    Delegate {
        delegate: Identity,
    },
    /// Owner-only; always refused on a recipient link.
    Reassign,
    /// Scheduler-only; always refused on a recipient link.
    Expire,
}

impl RecipientAction {
    /// The action kind used by the transition table.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::View { .. } => ActionKind::View,
            Self::Sign { .. } => ActionKind::Sign,
            Self::Decline { .. } => ActionKind::Decline,
            Self::Delegate { .. } => ActionKind::Delegate,
            Self::Reassign => ActionKind::Reassign,
            Self::Expire => ActionKind::Expire,
        }
    }
}

/// Result of a recipient action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub entry_id: String,
    pub recipient_index: u32,
    /// Entry status after the action.
    pub status: RecipientStatus,
    /// Group aggregate after the action.
    pub group_status: GroupStatus,
    pub signed_documents: Vec<String>,
    /// Sequential successor activated by this action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_index: Option<u32>,
}

/// Result of [`SigningEngine::request_verification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationIssued {
    /// Where the code was sent.
    pub sent_to: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Engine
// ============================================================================

/// Validates and applies actions against the recipient ledger.
pub struct SigningEngine {
    persistence: Arc<dyn Persistence>,
    dispatcher: NotificationDispatcher,
    finalizer: Arc<Finalizer>,
    telemetry: Arc<dyn ViewTelemetry>,
    config: EngineConfig,
}

impl std::fmt::Debug for SigningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEngine")
            .field("persistence", &"...")
            .field("dispatcher", &self.dispatcher)
            .field("finalizer", &self.finalizer)
            .field("telemetry", &"...")
            .field("config", &self.config)
            .finish()
    }
}

/// Entry a link resolved to, with the snapshot it was read from.
struct Resolved {
    snapshot: GroupSnapshot,
    entry: LedgerEntry,
    role: LinkRole,
}

fn ensure_open(group: &RequestGroup) -> Result<(), CoreError> {
    if group.status == GroupStatus::PendingSignature {
        Ok(())
    } else {
        Err(CoreError::conflict(
            &group.group_id,
            group.status.as_str(),
            format!("group is already {}", group.status.as_str()),
        ))
    }
}

fn validate_identity(field: &str, identity: &Identity) -> Result<(), CoreError> {
    if identity.name.trim().is_empty() {
        return Err(CoreError::validation(
            format!("{}.name", field),
            "name is required",
        ));
    }
    let email = identity.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CoreError::validation(
            format!("{}.email", field),
            format!("'{}' is not a valid email address", identity.email),
        ));
    }
    Ok(())
}

fn same_address(a: &Identity, b: &Identity) -> bool {
    a.email.trim().eq_ignore_ascii_case(b.email.trim())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn outcome(entry: &LedgerEntry, status: RecipientStatus, group_status: GroupStatus) -> ActionOutcome {
    ActionOutcome {
        entry_id: entry.entry_id.clone(),
        recipient_index: entry.recipient_index,
        status,
        group_status,
        signed_documents: entry.signed_documents.iter().cloned().collect(),
        activated_index: None,
    }
}

fn validate_fields(
    fields: &[FieldPlacement],
    documents: &[DocumentRef],
    recipient_count: usize,
) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        let name = format!("fields.{}", field.field_id);
        if field.field_id.trim().is_empty() {
            return Err(CoreError::validation("fields", "field_id is required"));
        }
        if !seen.insert(field.field_id.as_str()) {
            return Err(CoreError::validation(name, "duplicate field id"));
        }
        let Some(document) = documents.iter().find(|d| d.document_id == field.document_id) else {
            return Err(CoreError::validation(
                name,
                format!("unknown document '{}'", field.document_id),
            ));
        };
        if field.recipient_index as usize >= recipient_count {
            return Err(CoreError::validation(
                name,
                format!("no recipient at index {}", field.recipient_index),
            ));
        }
        if field.page == 0 || field.page > document.page_count {
            return Err(CoreError::validation(
                name,
                format!(
                    "page {} is outside 1..={}",
                    field.page, document.page_count
                ),
            ));
        }
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(field.x) && in_unit(field.y)) {
            return Err(CoreError::validation(name, "position must be within the page"));
        }
        if !(field.width > 0.0 && field.height > 0.0 && in_unit(field.width) && in_unit(field.height))
        {
            return Err(CoreError::validation(name, "size must be within (0, 1]"));
        }
    }
    Ok(())
}

impl SigningEngine {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        dispatcher: NotificationDispatcher,
        finalizer: Arc<Finalizer>,
        telemetry: Arc<dyn ViewTelemetry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            persistence,
            dispatcher,
            finalizer,
            telemetry,
            config,
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Group creation
    // ========================================================================

    /// Create a group and all of its ledger entries.
    pub async fn create_group(
        &self,
        owner: Owner,
        request: CreateGroupRequest,
    ) -> Result<CreatedGroup, CoreError> {
        self.create_group_at(owner, request, Utc::now()).await
    }

    #[instrument(skip_all, fields(owner_id = %owner.id))]
    pub async fn create_group_at(
        &self,
        owner: Owner,
        request: CreateGroupRequest,
        now: DateTime<Utc>,
    ) -> Result<CreatedGroup, CoreError> {
        // 1. Validate the request as a whole
        if owner.id.trim().is_empty() {
            return Err(CoreError::validation("owner.id", "owner id is required"));
        }
        if request.title.trim().is_empty() {
            return Err(CoreError::validation("title", "title is required"));
        }
        if request.documents.is_empty() {
            return Err(CoreError::validation(
                "documents",
                "at least one document is required",
            ));
        }
        let mut document_ids = std::collections::HashSet::new();
        for document in &request.documents {
            if document.document_id.trim().is_empty() || document.blob_ref.trim().is_empty() {
                return Err(CoreError::validation(
                    "documents",
                    "document_id and blob_ref are required",
                ));
            }
            if !document_ids.insert(document.document_id.as_str()) {
                return Err(CoreError::validation(
                    "documents",
                    format!("duplicate document '{}'", document.document_id),
                ));
            }
            if document.page_count == 0 {
                return Err(CoreError::validation(
                    "documents",
                    format!("document '{}' has no pages", document.document_id),
                ));
            }
        }
        if request.recipients.is_empty() || request.recipients.len() > MAX_RECIPIENTS {
            return Err(CoreError::validation(
                "recipients",
                format!("between 1 and {} recipients are required", MAX_RECIPIENTS),
            ));
        }
        if request.due_at.is_some_and(|due| due <= now) {
            return Err(CoreError::validation("due_at", "due date must be in the future"));
        }
        for (index, recipient) in request.recipients.iter().enumerate() {
            let field = format!("recipients[{}]", index);
            validate_identity(&field, &recipient.identity)?;
            if recipient.due_at.is_some_and(|due| due <= now) {
                return Err(CoreError::validation(
                    format!("{}.due_at", field),
                    "due date must be in the future",
                ));
            }
            if recipient
                .access_code
                .as_deref()
                .is_some_and(|code| code.trim().chars().count() < MIN_ACCESS_CODE_LEN)
            {
                return Err(CoreError::validation(
                    format!("{}.access_code", field),
                    format!("access code needs at least {} characters", MIN_ACCESS_CODE_LEN),
                ));
            }
        }
        validate_fields(&request.fields, &request.documents, request.recipients.len())?;

        // 2. Build the ledger
        let group_id = new_id();
        let statuses = initial_statuses(request.signing_order, request.recipients.len());
        let mut entries = Vec::with_capacity(request.recipients.len());
        for ((index, recipient), status) in request.recipients.iter().enumerate().zip(statuses) {
            let recipient_index = u32::try_from(index)
                .map_err(|e| CoreError::validation("recipients", e.to_string()))?;
            let entry_id = new_id();
            let access_code_hash = recipient
                .access_code
                .as_deref()
                .map(|code| hash_secret(&entry_id, code))
                .transpose()?;
            entries.push(LedgerEntry {
                group_id: group_id.clone(),
                recipient_index,
                link_id: new_id(),
                identity: Identity {
                    name: recipient.identity.name.trim().to_string(),
                    email: recipient.identity.email.trim().to_string(),
                    role: recipient.identity.role.clone(),
                },
                assigned_fields: request
                    .fields
                    .iter()
                    .filter(|f| f.recipient_index == recipient_index)
                    .cloned()
                    .collect(),
                status,
                signed_documents: Default::default(),
                signed_payload: None,
                timestamps: LedgerTimestamps {
                    created_at: Some(now),
                    issued_at: Some(now),
                    ..Default::default()
                },
                decline_reason: None,
                cancel_reason: None,
                access_policy: AccessPolicy {
                    access_code_hash,
                    require_verification: recipient.require_verification,
                    due_at: recipient.due_at,
                },
                verification: VerificationState::default(),
                delegation: None,
                reassignments: Vec::new(),
                entry_id,
            });
        }

        let group = RequestGroup {
            group_id: group_id.clone(),
            owner,
            title: request.title.trim().to_string(),
            documents: request.documents,
            recipients: entries.iter().map(|e| e.entry_id.clone()).collect(),
            signing_order: request.signing_order,
            view_mode: request.view_mode,
            status: GroupStatus::PendingSignature,
            status_reason: None,
            artifact_ref: None,
            document_artifacts: Default::default(),
            expiration_policy: ExpirationPolicy {
                due_at: request.due_at,
                hard_cutoff: request.hard_cutoff,
            },
            finalization: FinalizationState::default(),
            created_at: now,
            completed_at: None,
            declined_at: None,
            cancelled_at: None,
        };

        // 3. Persist atomically
        self.persistence.insert_group(&group, &entries).await?;
        info!(
            group_id = %group_id,
            recipients = entries.len(),
            documents = group.documents.len(),
            signing_order = group.signing_order.as_str(),
            "Signing group created"
        );

        // 4. Invite every eligible recipient
        let invitations = entries
            .iter()
            .filter(|e| e.status == RecipientStatus::Pending)
            .map(|e| {
                to_recipient(
                    NotificationKind::SignatureRequest,
                    &group,
                    e,
                    json!({ "recipient_index": e.recipient_index, "due_at": e.due_at(&group) }),
                )
            })
            .collect();
        self.dispatcher.dispatch_all(invitations).await;

        Ok(CreatedGroup {
            group_id,
            status: group.status,
            recipients: entries
                .iter()
                .map(|e| RecipientLink {
                    entry_id: e.entry_id.clone(),
                    recipient_index: e.recipient_index,
                    email: e.identity.email.clone(),
                    link_id: e.link_id.clone(),
                    status: e.status,
                })
                .collect(),
        })
    }

    // ========================================================================
    // Recipient links
    // ========================================================================

    async fn resolve(&self, link_id: &str) -> Result<Resolved, CoreError> {
        let record = self
            .persistence
            .find_entry_by_link(link_id)
            .await?
            .ok_or_else(|| CoreError::not_found("recipient link", link_id))?;
        let snapshot = load_snapshot(self.persistence.as_ref(), &record.group_id).await?;
        let entry = snapshot
            .entries
            .iter()
            .find(|e| e.entry_id == record.entry_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("recipient link", link_id))?;
        let role = resolve_link(&entry, link_id)?;
        Ok(Resolved {
            snapshot,
            entry,
            role,
        })
    }

    /// What a recipient link sees.
    #[instrument(skip_all, fields(link_id = %link_id))]
    pub async fn get_status(
        &self,
        link_id: &str,
        credentials: &LinkCredentials,
    ) -> Result<LedgerView, CoreError> {
        let resolved = self.resolve(link_id).await?;
        if resolved.role == LinkRole::Recipient {
            check_access_code(&resolved.entry, credentials.access_code.as_deref())?;
        }
        Ok(build_view(
            &resolved.snapshot,
            &resolved.entry,
            link_id,
            resolved.role,
            Utc::now(),
        ))
    }

    /// Apply an action submitted through a recipient link.
    pub async fn submit_action(
        &self,
        link_id: &str,
        credentials: &LinkCredentials,
        action: RecipientAction,
    ) -> Result<ActionOutcome, CoreError> {
        self.submit_action_at(link_id, credentials, action, Utc::now())
            .await
    }

    #[instrument(skip_all, fields(link_id = %link_id, action = action.kind().as_str()))]
    pub async fn submit_action_at(
        &self,
        link_id: &str,
        credentials: &LinkCredentials,
        action: RecipientAction,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, CoreError> {
        // 1. Resolve the link; reassigned-away links are view-only
        let Resolved {
            snapshot,
            entry,
            role,
        } = self.resolve(link_id).await?;
        let actor = role.actor()?;

        // 2. Access code
        if role == LinkRole::Recipient {
            check_access_code(&entry, credentials.access_code.as_deref())?;
        }

        // 3. Transition table, then group-level guards
        let kind = action.kind();
        let step = transition(entry.status, kind, actor).inspect_err(|e| {
            debug!(status = entry.status.as_str(), error = %e, "Action rejected");
        })?;
        ensure_open(&snapshot.group)?;
        if matches!(kind, ActionKind::View | ActionKind::Sign)
            && snapshot.group.is_hard_expired_for(&entry, now)
        {
            return Err(CoreError::conflict(
                &entry.entry_id,
                entry.status.as_str(),
                "the signing period has ended",
            ));
        }

        // 4. Apply
        match action {
            RecipientAction::View { context } => {
                self.apply_view(&snapshot, &entry, role, step.to, context, now)
                    .await
            }
            RecipientAction::Sign { documents, values } => {
                self.apply_sign(
                    &snapshot,
                    &entry,
                    credentials,
                    documents.as_deref(),
                    &values,
                    now,
                )
                .await
            }
            RecipientAction::Decline { reason } => {
                self.apply_decline(&snapshot, &entry, &reason, now).await
            }
            RecipientAction::Delegate { delegate } => {
                self.apply_delegate(&snapshot, &entry, delegate, now).await
            }
            RecipientAction::Reassign | RecipientAction::Expire => Err(CoreError::access_denied(
                format!("'{}' cannot be submitted through a recipient link", kind.as_str()),
            )),
        }
    }

    /// Build the conflict returned after a lost compare-and-swap.
    async fn lost_race(&self, entry: &LedgerEntry, action: ActionKind) -> CoreError {
        let current = match self.persistence.get_entry(&entry.entry_id).await {
            Ok(Some(record)) => record.status,
            _ => entry.status.as_str().to_string(),
        };
        debug!(entry_id = %entry.entry_id, status = %current, "Concurrent update won");
        CoreError::conflict(
            &entry.entry_id,
            current,
            format!(
                "'{}' lost to a concurrent update; reload and retry",
                action.as_str()
            ),
        )
    }

    async fn apply_view(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        role: LinkRole,
        to: RecipientStatus,
        context: ViewContext,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, CoreError> {
        if to != entry.status {
            let applied = self
                .persistence
                .record_view(&ViewWrite {
                    group_id: &snapshot.group.group_id,
                    entry_id: &entry.entry_id,
                    expected_status: entry.status,
                    new_status: to,
                    now,
                })
                .await?;
            if !applied {
                return Err(self.lost_race(entry, ActionKind::View).await);
            }
            info!(entry_id = %entry.entry_id, "Recipient viewed request");
        }

        self.telemetry
            .record_view(&ViewEvent {
                group_id: snapshot.group.group_id.clone(),
                entry_id: entry.entry_id.clone(),
                recipient_index: entry.recipient_index,
                link_role: role.as_str(),
                viewed_at: now,
                context,
            })
            .await;

        Ok(outcome(entry, to, snapshot.group.status))
    }

    async fn apply_sign(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        credentials: &LinkCredentials,
        documents: Option<&[String]>,
        values: &SignedPayload,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, CoreError> {
        let group = &snapshot.group;
        check_verification(
            entry,
            credentials.verification_code.as_deref(),
            now.timestamp_millis(),
        )?;
        let plan = plan_signature(group, entry, documents, values)?;

        let new_status = if plan.fully_signed {
            RecipientStatus::Signed
        } else {
            entry.status
        };
        let activate_index = if plan.fully_signed {
            next_activation(
                group.signing_order,
                &snapshot.statuses(),
                entry.recipient_index,
            )
        } else {
            None
        };

        let expected_signed_documents = encode_signed_documents(&entry.signed_documents)?;
        let signed_documents = encode_signed_documents(&plan.signed_documents)?;
        let signed_payload = serde_json::to_string(&plan.payload)?;
        let result = self
            .persistence
            .record_signature(&SignatureWrite {
                group_id: &group.group_id,
                entry_id: &entry.entry_id,
                expected_status: entry.status,
                expected_signed_documents: &expected_signed_documents,
                new_status,
                signed_documents: &signed_documents,
                signed_payload: &signed_payload,
                fully_signed: plan.fully_signed,
                verified: entry.access_policy.require_verification,
                activate_index,
                now,
            })
            .await?;
        if !result.applied {
            return Err(self.lost_race(entry, ActionKind::Sign).await);
        }
        info!(
            entry_id = %entry.entry_id,
            documents = ?plan.newly_signed,
            fully_signed = plan.fully_signed,
            "Signature recorded"
        );

        // Notifications go out only after the write committed.
        let signer = entry.acting_identity();
        let mut notifications = vec![to_owner(
            NotificationKind::RecipientSigned,
            group,
            json!({
                "recipient_index": entry.recipient_index,
                "signer_name": signer.name,
                "signer_email": signer.email,
                "documents": plan.newly_signed,
                "fully_signed": plan.fully_signed,
            }),
        )];
        let activated_index = activate_index.filter(|_| result.activated);
        if let Some(successor) = activated_index.and_then(|i| snapshot.entry_at(i)) {
            info!(recipient_index = successor.recipient_index, "Next recipient activated");
            notifications.push(to_recipient(
                NotificationKind::YourTurn,
                group,
                successor,
                json!({ "recipient_index": successor.recipient_index }),
            ));
        }
        self.dispatcher.dispatch_all(notifications).await;

        let group_status = if plan.fully_signed {
            self.resolve_group(&group.group_id, now).await
        } else {
            group.status
        };

        Ok(ActionOutcome {
            entry_id: entry.entry_id.clone(),
            recipient_index: entry.recipient_index,
            status: new_status,
            group_status,
            signed_documents: plan.signed_documents.into_iter().collect(),
            activated_index,
        })
    }

    async fn apply_decline(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, CoreError> {
        let group = &snapshot.group;
        let reason = reason.trim();
        if reason.chars().count() < self.config.min_decline_reason_len {
            return Err(CoreError::validation(
                "reason",
                format!(
                    "a reason of at least {} characters is required",
                    self.config.min_decline_reason_len
                ),
            ));
        }

        let decliner = entry.acting_identity();
        let cancel_reason = format!(
            "Declined by {} <{}> (recipient {}): {}",
            decliner.name, decliner.email, entry.recipient_index, reason
        );
        let siblings = self
            .persistence
            .record_decline(&DeclineWrite {
                group_id: &group.group_id,
                entry_id: &entry.entry_id,
                expected_status: entry.status,
                reason,
                cancel_reason: &cancel_reason,
                now,
            })
            .await?;
        let Some(cancelled) = siblings else {
            return Err(self.lost_race(entry, ActionKind::Decline).await);
        };
        let cancelled = entries_from_records(cancelled)?;
        info!(
            entry_id = %entry.entry_id,
            cancelled = cancelled.len(),
            "Recipient declined, group declined"
        );

        let data = json!({
            "recipient_index": entry.recipient_index,
            "declined_by": decliner.name,
            "declined_by_email": decliner.email,
            "reason": reason,
        });
        let mut notifications = vec![to_owner(NotificationKind::Declined, group, data.clone())];
        notifications.extend(cancelled.iter().map(|sibling| {
            to_recipient(
                NotificationKind::Cancelled,
                group,
                sibling,
                json!({ "reason": cancel_reason }),
            )
        }));
        notifications.extend(
            snapshot
                .entries
                .iter()
                .filter(|e| e.status == RecipientStatus::Signed)
                .map(|e| to_recipient(NotificationKind::Declined, group, e, data.clone())),
        );
        self.dispatcher.dispatch_all(notifications).await;

        let group_status = self.resolve_group(&group.group_id, now).await;
        Ok(outcome(entry, RecipientStatus::Declined, group_status))
    }

    async fn apply_delegate(
        &self,
        snapshot: &GroupSnapshot,
        entry: &LedgerEntry,
        delegate: Identity,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, CoreError> {
        let group = &snapshot.group;
        validate_identity("delegate", &delegate)?;
        if same_address(&delegate, &entry.identity) {
            return Err(CoreError::validation(
                "delegate.email",
                "cannot delegate to yourself",
            ));
        }
        let delegate = Identity {
            name: delegate.name.trim().to_string(),
            email: delegate.email.trim().to_string(),
            role: delegate.role,
        };

        let delegate_link_id = new_id();
        let applied = self
            .persistence
            .record_delegation(&DelegationWrite {
                group_id: &group.group_id,
                entry_id: &entry.entry_id,
                expected_status: entry.status,
                delegate: &delegate,
                delegate_link_id: &delegate_link_id,
                now,
            })
            .await?;
        if !applied {
            return Err(self.lost_race(entry, ActionKind::Delegate).await);
        }
        info!(entry_id = %entry.entry_id, "Entry delegated");

        let data = json!({
            "recipient_index": entry.recipient_index,
            "delegated_by": entry.identity.name,
            "delegated_by_email": entry.identity.email,
            "delegate_name": delegate.name,
            "delegate_email": delegate.email,
        });
        self.dispatcher
            .dispatch_all(vec![
                to_identity(
                    NotificationKind::Delegated,
                    group,
                    &delegate,
                    Some(delegate_link_id),
                    data.clone(),
                ),
                to_owner(NotificationKind::Delegated, group, data),
            ])
            .await;

        Ok(outcome(entry, RecipientStatus::Delegated, group.status))
    }

    /// Hand a resolved group to the finalizer. The action has already
    /// committed, so failures are logged and the sweep heals them later.
    async fn resolve_group(&self, group_id: &str, now: DateTime<Utc>) -> GroupStatus {
        match self.finalizer.on_resolution(group_id, now).await {
            Ok(status) => status,
            Err(e) => {
                error!(group_id = %group_id, error = %e, "Completion check failed");
                GroupStatus::PendingSignature
            }
        }
    }

    /// Issue a one-time verification code for the entry behind a link.
    pub async fn request_verification(
        &self,
        link_id: &str,
        credentials: &LinkCredentials,
    ) -> Result<VerificationIssued, CoreError> {
        self.request_verification_at(link_id, credentials, Utc::now())
            .await
    }

    #[instrument(skip_all, fields(link_id = %link_id))]
    pub async fn request_verification_at(
        &self,
        link_id: &str,
        credentials: &LinkCredentials,
        now: DateTime<Utc>,
    ) -> Result<VerificationIssued, CoreError> {
        let Resolved {
            snapshot,
            entry,
            role,
        } = self.resolve(link_id).await?;
        let actor = role.actor()?;
        if role == LinkRole::Recipient {
            check_access_code(&entry, credentials.access_code.as_deref())?;
        }
        if !entry.access_policy.require_verification {
            return Err(CoreError::validation(
                "verification",
                "this recipient does not require verification",
            ));
        }
        transition(entry.status, ActionKind::Sign, actor)?;
        ensure_open(&snapshot.group)?;

        let code = generate_verification_code();
        let code_hash = hash_secret(&entry.entry_id, &code)?;
        let ttl = chrono::Duration::from_std(self.config.verification_code_ttl)
            .map_err(|e| CoreError::validation("verification_code_ttl", e.to_string()))?;
        let expires_at = now + ttl;
        let stored = self
            .persistence
            .store_verification_challenge(
                &snapshot.group.group_id,
                &entry.entry_id,
                &code_hash,
                expires_at.timestamp_millis(),
                now,
            )
            .await?;
        if !stored {
            return Err(self.lost_race(&entry, ActionKind::Sign).await);
        }
        debug!(entry_id = %entry.entry_id, "Verification code issued");

        let recipient = entry.acting_identity();
        self.dispatcher
            .dispatch(to_identity(
                NotificationKind::VerificationCode,
                &snapshot.group,
                recipient,
                Some(link_id.to_string()),
                json!({ "code": code, "expires_at": expires_at }),
            ))
            .await;

        Ok(VerificationIssued {
            sent_to: recipient.email.clone(),
            expires_at,
        })
    }

    // ========================================================================
    // Owner operations
    // ========================================================================

    async fn owned_snapshot(
        &self,
        owner_id: &str,
        group_id: &str,
    ) -> Result<GroupSnapshot, CoreError> {
        let snapshot = load_snapshot(self.persistence.as_ref(), group_id).await?;
        if snapshot.group.owner.id != owner_id {
            return Err(CoreError::access_denied("not the owner of this group"));
        }
        Ok(snapshot)
    }

    /// The owner's view of a group.
    #[instrument(skip_all, fields(group_id = %group_id))]
    pub async fn get_group_summary(
        &self,
        owner_id: &str,
        group_id: &str,
    ) -> Result<GroupSummary, CoreError> {
        let snapshot = self.owned_snapshot(owner_id, group_id).await?;
        Ok(group_summary(&snapshot))
    }

    /// Replace the identity holding a recipient slot.
    pub async fn reassign(
        &self,
        owner_id: &str,
        group_id: &str,
        recipient_index: u32,
        identity: Identity,
        allow_original_view: bool,
    ) -> Result<RecipientLink, CoreError> {
        self.reassign_at(
            owner_id,
            group_id,
            recipient_index,
            identity,
            allow_original_view,
            Utc::now(),
        )
        .await
    }

    #[instrument(skip_all, fields(group_id = %group_id, recipient_index = recipient_index))]
    pub async fn reassign_at(
        &self,
        owner_id: &str,
        group_id: &str,
        recipient_index: u32,
        identity: Identity,
        allow_original_view: bool,
        now: DateTime<Utc>,
    ) -> Result<RecipientLink, CoreError> {
        validate_identity("identity", &identity)?;
        let snapshot = self.owned_snapshot(owner_id, group_id).await?;
        let entry = snapshot
            .entry_at(recipient_index)
            .ok_or_else(|| CoreError::not_found("recipient", recipient_index.to_string()))?;
        let step = transition(entry.status, ActionKind::Reassign, Actor::Owner)?;
        ensure_open(&snapshot.group)?;
        if same_address(&identity, &entry.identity) {
            return Err(CoreError::validation(
                "identity.email",
                "slot is already held by this address",
            ));
        }
        let identity = Identity {
            name: identity.name.trim().to_string(),
            email: identity.email.trim().to_string(),
            role: identity.role,
        };

        let mut history = entry.reassignments.clone();
        history.push(Reassignment {
            original_identity: entry.identity.clone(),
            original_link_id: entry.link_id.clone(),
            allow_original_view,
            reassigned_at: now,
        });
        let history = encode_reassignments(&history)?;

        let new_link_id = new_id();
        let applied = self
            .persistence
            .record_reassignment(&ReassignWrite {
                group_id,
                entry_id: &entry.entry_id,
                expected_status: entry.status,
                expected_link_id: &entry.link_id,
                new_status: step.to,
                identity: &identity,
                new_link_id: &new_link_id,
                reassignments: &history,
                now,
            })
            .await?;
        if !applied {
            return Err(self.lost_race(entry, ActionKind::Reassign).await);
        }
        info!(
            entry_id = %entry.entry_id,
            allow_original_view,
            "Recipient slot reassigned"
        );

        self.dispatcher
            .dispatch(to_identity(
                NotificationKind::Reassigned,
                &snapshot.group,
                &identity,
                Some(new_link_id.clone()),
                json!({
                    "recipient_index": recipient_index,
                    "replaces": entry.identity.name,
                    "can_act": step.to != RecipientStatus::AwaitingTurn,
                }),
            ))
            .await;

        Ok(RecipientLink {
            entry_id: entry.entry_id.clone(),
            recipient_index,
            email: identity.email,
            link_id: new_link_id,
            status: step.to,
        })
    }

    /// Void a pending group; every unsigned entry is cancelled.
    pub async fn cancel_group(
        &self,
        owner_id: &str,
        group_id: &str,
        reason: &str,
    ) -> Result<GroupSummary, CoreError> {
        self.cancel_group_at(owner_id, group_id, reason, Utc::now())
            .await
    }

    #[instrument(skip_all, fields(group_id = %group_id))]
    pub async fn cancel_group_at(
        &self,
        owner_id: &str,
        group_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<GroupSummary, CoreError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::validation("reason", "a reason is required"));
        }
        let snapshot = self.owned_snapshot(owner_id, group_id).await?;
        ensure_open(&snapshot.group)?;

        let cancelled = self
            .persistence
            .cancel_group(group_id, reason, now)
            .await?
            .ok_or_else(|| {
                CoreError::conflict(group_id, "resolved", "group was resolved concurrently")
            })?;
        info!(cancelled = cancelled.len(), "Group cancelled by owner");

        let notifications = entries_from_records(cancelled)?
            .iter()
            .map(|e| {
                to_recipient(
                    NotificationKind::Cancelled,
                    &snapshot.group,
                    e,
                    json!({ "reason": reason, "cancelled_by": snapshot.group.owner.name }),
                )
            })
            .collect();
        self.dispatcher.dispatch_all(notifications).await;

        let snapshot = load_snapshot(self.persistence.as_ref(), group_id).await?;
        Ok(group_summary(&snapshot))
    }

    /// Hard-delete a resolved group and its ledger.
    #[instrument(skip_all, fields(group_id = %group_id))]
    pub async fn delete_group(&self, owner_id: &str, group_id: &str) -> Result<(), CoreError> {
        let snapshot = self.owned_snapshot(owner_id, group_id).await?;
        if snapshot.group.status == GroupStatus::PendingSignature {
            return Err(CoreError::conflict(
                group_id,
                snapshot.group.status.as_str(),
                "cancel the group before deleting it",
            ));
        }
        if !self.persistence.delete_group(group_id).await? {
            return Err(CoreError::not_found("group", group_id));
        }
        info!("Group deleted");
        Ok(())
    }
}

/// Convert entry rows into ledger entries.
pub fn entries_from_records(records: Vec<EntryRecord>) -> Result<Vec<LedgerEntry>, CoreError> {
    records.into_iter().map(LedgerEntry::try_from).collect()
}
