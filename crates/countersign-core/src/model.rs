// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ledger and request group data model.
//!
//! These are the typed views of the persisted rows in [`crate::persistence`].
//! Status columns are stored as snake_case strings and parsed into the closed
//! enums below at the persistence boundary.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of one recipient ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Eligible to act, has not opened the request yet.
    Pending,
    /// Eligible to act, has opened the request.
    Viewed,
    /// Sequential mode: waiting for an earlier recipient to sign.
    AwaitingTurn,
    /// Signed every document in the group.
    Signed,
    /// Refused to sign.
    Declined,
    /// Cancelled by a sibling decline or by the owner.
    Cancelled,
    /// Forwarded to another identity who now acts on this slot.
    Delegated,
}

impl RecipientStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Viewed => "viewed",
            Self::AwaitingTurn => "awaiting_turn",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Delegated => "delegated",
        }
    }

    /// Parse a status from its persisted form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "viewed" => Ok(Self::Viewed),
            "awaiting_turn" => Ok(Self::AwaitingTurn),
            "signed" => Ok(Self::Signed),
            "declined" => Ok(Self::Declined),
            "cancelled" => Ok(Self::Cancelled),
            "delegated" => Ok(Self::Delegated),
            other => Err(CoreError::decode("status", format!("unknown status '{}'", other))),
        }
    }

    /// Signed, declined and cancelled entries never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Signed | Self::Declined | Self::Cancelled)
    }

    /// Whether someone is currently expected to act on this entry.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Pending | Self::Viewed | Self::Delegated)
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of a request group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// At least one recipient still has to act.
    PendingSignature,
    /// Every entry is signed.
    Completed,
    /// A recipient declined.
    Declined,
    /// The owner voided the request.
    Cancelled,
}

impl GroupStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSignature => "pending_signature",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its persisted form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending_signature" => Ok(Self::PendingSignature),
            "completed" => Ok(Self::Completed),
            "declined" => Ok(Self::Declined),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::decode(
                "status",
                format!("unknown group status '{}'", other),
            )),
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may act, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SigningOrder {
    /// Every recipient may act at once.
    #[default]
    Any,
    /// Recipients act one at a time in `recipient_index` order.
    Sequential,
}

impl SigningOrder {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Sequential => "sequential",
        }
    }

    /// Parse from the persisted form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "any" => Ok(Self::Any),
            "sequential" => Ok(Self::Sequential),
            other => Err(CoreError::decode(
                "signing_order",
                format!("unknown signing order '{}'", other),
            )),
        }
    }
}

/// Whether recipients see each other's signed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// A recipient sees only their own fields.
    #[default]
    Isolated,
    /// A recipient also sees a read-only projection of fields already signed by others.
    Shared,
}

impl ViewMode {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Shared => "shared",
        }
    }

    /// Parse from the persisted form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "isolated" => Ok(Self::Isolated),
            "shared" => Ok(Self::Shared),
            other => Err(CoreError::decode(
                "view_mode",
                format!("unknown view mode '{}'", other),
            )),
        }
    }
}

/// A person taking part in a signing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Address notifications are sent to.
    pub email: String,
    /// Free-form role label ("signer", "witness", ...).
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "signer".to_string()
}

impl Identity {
    /// Create an identity with the default `signer` role.
    pub fn signer(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role: default_role(),
        }
    }
}

/// The account that created the request group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Account identifier supplied by the authentication layer.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Address owner notifications are sent to.
    pub email: String,
}

/// Opaque reference to a document held by the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Identifier of the document inside this group.
    pub document_id: String,
    /// Blob store reference of the source bytes.
    pub blob_ref: String,
    /// Human-readable name.
    pub display_name: String,
    /// Number of pages.
    pub page_count: u32,
}

/// Kind of input a field collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Drawn or typed signature.
    Signature,
    /// Initials.
    Initials,
    /// Free text.
    Text,
    /// Date value.
    Date,
    /// Boolean checkbox.
    Checkbox,
}

/// A field placed on a document page and owned by one recipient slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPlacement {
    /// Identifier, unique within the group.
    pub field_id: String,
    /// Document the field is placed on.
    pub document_id: String,
    /// Owning recipient slot.
    pub recipient_index: u32,
    /// Kind of value collected.
    pub kind: FieldKind,
    /// 1-based page number.
    pub page: u32,
    /// Horizontal position, relative to page width.
    pub x: f32,
    /// Vertical position, relative to page height.
    pub y: f32,
    /// Width, relative to page width.
    pub width: f32,
    /// Height, relative to page height.
    pub height: f32,
    /// Whether a value must be supplied when signing.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Optional label shown next to the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Per-recipient access requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// HMAC digest of the access code, when one is required.
    pub access_code_hash: Option<String>,
    /// Whether a one-time verification code must accompany `sign`.
    pub require_verification: bool,
    /// Recipient-specific due date, overriding the group due date.
    pub due_at: Option<DateTime<Utc>>,
}

/// Outstanding one-time verification challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationState {
    /// HMAC digest of the issued code.
    pub code_hash: Option<String>,
    /// When the issued code stops being accepted (epoch millis).
    pub expires_at_ms: Option<i64>,
    /// When the recipient last passed verification.
    pub verified_at: Option<DateTime<Utc>>,
}

/// Forwarding record written by `delegate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    /// Who now acts on the slot.
    pub delegate: Identity,
    /// The delegate's own link.
    pub link_id: String,
    /// When the slot was delegated.
    pub delegated_at: DateTime<Utc>,
}

/// Record of an owner-initiated identity replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reassignment {
    /// Identity that held the slot before.
    pub original_identity: Identity,
    /// Link that identity was given.
    pub original_link_id: String,
    /// Whether the original link keeps resolving in view-only mode.
    pub allow_original_view: bool,
    /// When the slot changed hands.
    pub reassigned_at: DateTime<Utc>,
}

/// Lifecycle timestamps of a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerTimestamps {
    /// When the entry was created with its group.
    pub created_at: Option<DateTime<Utc>>,
    /// When the current holder was asked to act: creation, sequential
    /// activation, delegation or reassignment.
    pub issued_at: Option<DateTime<Utc>>,
    /// First `view`.
    pub viewed_at: Option<DateTime<Utc>>,
    /// When the entry became `signed`.
    pub signed_at: Option<DateTime<Utc>>,
    /// When the entry became `declined`.
    pub declined_at: Option<DateTime<Utc>>,
    /// When the entry became `cancelled`.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the scheduler annotated the entry as expired.
    pub expired_at: Option<DateTime<Utc>>,
}

/// Filled field values keyed by field id.
pub type SignedPayload = BTreeMap<String, serde_json::Value>;

/// One recipient's participation record within a request group.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// Unique entry id.
    pub entry_id: String,
    /// Owning group.
    pub group_id: String,
    /// Stable position used for ordering and field ownership.
    pub recipient_index: u32,
    /// The recipient's link.
    pub link_id: String,
    /// Current holder of the slot.
    pub identity: Identity,
    /// Fields owned by this slot, across every document.
    pub assigned_fields: Vec<FieldPlacement>,
    /// Current status.
    pub status: RecipientStatus,
    /// Documents this recipient has signed so far.
    pub signed_documents: BTreeSet<String>,
    /// Filled values; present once at least one document is signed.
    pub signed_payload: Option<SignedPayload>,
    /// Lifecycle timestamps.
    pub timestamps: LedgerTimestamps,
    /// Reason given with `decline`.
    pub decline_reason: Option<String>,
    /// Reason recorded when the entry was cancelled.
    pub cancel_reason: Option<String>,
    /// Access requirements.
    pub access_policy: AccessPolicy,
    /// One-time verification state.
    pub verification: VerificationState,
    /// Present while the slot is delegated.
    pub delegation: Option<Delegation>,
    /// Every owner reassignment of the slot, oldest first.
    pub reassignments: Vec<Reassignment>,
}

impl LedgerEntry {
    /// Address that should receive notifications for this slot right now.
    pub fn acting_identity(&self) -> &Identity {
        match &self.delegation {
            Some(delegation) if self.status == RecipientStatus::Delegated => {
                &delegation.delegate
            }
            _ => &self.identity,
        }
    }

    /// The reassignment that retired `link_id`, if any.
    pub fn reassignment_for(&self, link_id: &str) -> Option<&Reassignment> {
        self.reassignments
            .iter()
            .find(|r| r.original_link_id == link_id)
    }

    /// Fields this slot owns on one document.
    pub fn fields_on<'a>(
        &'a self,
        document_id: &'a str,
    ) -> impl Iterator<Item = &'a FieldPlacement> + 'a {
        self.assigned_fields
            .iter()
            .filter(move |f| f.document_id == document_id)
    }

    /// Effective due date: the entry override, else the group's.
    pub fn due_at(&self, group: &RequestGroup) -> Option<DateTime<Utc>> {
        self.access_policy
            .due_at
            .or(group.expiration_policy.due_at)
    }
}

/// Due date and cutoff behaviour of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// When signing is due.
    pub due_at: Option<DateTime<Utc>>,
    /// Whether `sign`/`view` are refused once the due date has passed.
    pub hard_cutoff: bool,
}

/// Bookkeeping for the exactly-once finalization step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationState {
    /// Failed assembly attempts so far.
    pub attempts: u32,
    /// Last assembler error.
    pub last_error: Option<String>,
    /// Earliest next retry (epoch millis).
    pub next_attempt_at_ms: Option<i64>,
}

/// The aggregate of ledger entries for one signing transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestGroup {
    /// Group id.
    pub group_id: String,
    /// Creator of the group.
    pub owner: Owner,
    /// Subject line shown to recipients.
    pub title: String,
    /// One document, or several for an envelope.
    pub documents: Vec<DocumentRef>,
    /// Entry ids ordered by `recipient_index`.
    pub recipients: Vec<String>,
    /// Ordering mode.
    pub signing_order: SigningOrder,
    /// Visibility mode.
    pub view_mode: ViewMode,
    /// Aggregate status.
    pub status: GroupStatus,
    /// Why the group left `pending_signature`, when it did so by decline or cancel.
    pub status_reason: Option<String>,
    /// Finalized signed artifact; written at most once.
    pub artifact_ref: Option<String>,
    /// Per-document artifacts of an envelope.
    pub document_artifacts: BTreeMap<String, String>,
    /// Due date and cutoff.
    pub expiration_policy: ExpirationPolicy,
    /// Finalization retry state.
    pub finalization: FinalizationState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the completion claim succeeded.
    pub completed_at: Option<DateTime<Utc>>,
    /// When a recipient declined.
    pub declined_at: Option<DateTime<Utc>>,
    /// When the owner cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl RequestGroup {
    /// More than one document makes the group an envelope.
    pub fn is_envelope(&self) -> bool {
        self.documents.len() > 1
    }

    /// Look up a document by id.
    pub fn document(&self, document_id: &str) -> Option<&DocumentRef> {
        self.documents.iter().find(|d| d.document_id == document_id)
    }

    /// Whether the hard cutoff applies at `now` for a given entry.
    pub fn is_hard_expired_for(&self, entry: &LedgerEntry, now: DateTime<Utc>) -> bool {
        self.expiration_policy.hard_cutoff
            && entry.due_at(self).is_some_and(|due| now >= due)
    }
}

/// A group together with all of its ledger entries, read in one pass.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    /// The group header.
    pub group: RequestGroup,
    /// Entries ordered by `recipient_index`.
    pub entries: Vec<LedgerEntry>,
}

impl GroupSnapshot {
    /// Entry at a recipient index.
    pub fn entry_at(&self, recipient_index: u32) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.recipient_index == recipient_index)
    }

    /// Statuses ordered by recipient index.
    pub fn statuses(&self) -> Vec<RecipientStatus> {
        self.entries.iter().map(|e| e.status).collect()
    }
}
