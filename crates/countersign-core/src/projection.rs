// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only views over a group snapshot.
//!
//! [`LedgerView`] is what a recipient link sees; [`GroupSummary`] is what the
//! owner sees. In `shared` view mode a recipient additionally sees the values
//! other recipients have already signed, per document; in `isolated` mode
//! never.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::access::LinkRole;
use crate::envelope::{DocumentProgress, document_progress};
use crate::model::{
    DocumentRef, FieldPlacement, GroupSnapshot, GroupStatus, Identity, LedgerEntry,
    RecipientStatus, SignedPayload, SigningOrder, ViewMode,
};
use crate::transitions::ActionKind;

/// A field value signed by another recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedValue {
    pub field: FieldPlacement,
    pub value: Value,
    pub recipient_index: u32,
    pub signer_name: String,
}

/// One document as seen by a recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentView {
    pub document: DocumentRef,
    /// Whether this recipient has signed the document.
    pub signed: bool,
    /// This recipient's fields on the document.
    pub fields: Vec<FieldPlacement>,
}

/// What a recipient link sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerView {
    pub group_id: String,
    pub title: String,
    pub group_status: GroupStatus,
    pub signing_order: SigningOrder,
    pub view_mode: ViewMode,
    /// `recipient`, `delegate` or `original`.
    pub link_role: &'static str,
    pub recipient_index: u32,
    /// Identity this link acts as.
    pub identity: Identity,
    pub status: RecipientStatus,
    /// Actions this link may currently submit.
    pub allowed_actions: Vec<&'static str>,
    pub documents: Vec<DocumentView>,
    /// Values this slot has supplied so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own_values: Option<SignedPayload>,
    /// Values signed by others; empty unless the group is in shared mode.
    pub shared_values: Vec<SharedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Whether the due date has passed.
    pub overdue: bool,
    pub requires_verification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// Values other recipients have signed, visible to `viewer_index` in shared mode.
pub fn shared_values(snapshot: &GroupSnapshot, viewer_index: u32) -> Vec<SharedValue> {
    if snapshot.group.view_mode != ViewMode::Shared {
        return Vec::new();
    }
    let mut shared = Vec::new();
    for other in snapshot
        .entries
        .iter()
        .filter(|e| e.recipient_index != viewer_index)
    {
        let Some(payload) = other.signed_payload.as_ref() else {
            continue;
        };
        for field in other
            .assigned_fields
            .iter()
            .filter(|f| other.signed_documents.contains(&f.document_id))
        {
            if let Some(value) = payload.get(&field.field_id) {
                shared.push(SharedValue {
                    field: field.clone(),
                    value: value.clone(),
                    recipient_index: other.recipient_index,
                    signer_name: other.acting_identity().name.clone(),
                });
            }
        }
    }
    shared
}

fn allowed_actions(
    snapshot: &GroupSnapshot,
    entry: &LedgerEntry,
    role: LinkRole,
    now: DateTime<Utc>,
) -> Vec<&'static str> {
    let Ok(actor) = role.actor() else {
        return Vec::new();
    };
    if snapshot.group.status != GroupStatus::PendingSignature {
        return Vec::new();
    }
    let hard_expired = snapshot.group.is_hard_expired_for(entry, now);
    [
        ActionKind::View,
        ActionKind::Sign,
        ActionKind::Decline,
        ActionKind::Delegate,
    ]
    .into_iter()
    .filter(|action| !(hard_expired && matches!(action, ActionKind::View | ActionKind::Sign)))
    .filter(|action| crate::transitions::transition(entry.status, *action, actor).is_ok())
    .map(|action| action.as_str())
    .collect()
}

/// Build the view `link_id` sees.
pub fn build_view(
    snapshot: &GroupSnapshot,
    entry: &LedgerEntry,
    link_id: &str,
    role: LinkRole,
    now: DateTime<Utc>,
) -> LedgerView {
    let group = &snapshot.group;
    let identity = match role {
        LinkRole::Delegate => entry.acting_identity().clone(),
        LinkRole::Original => entry
            .reassignment_for(link_id)
            .map(|r| r.original_identity.clone())
            .unwrap_or_else(|| entry.identity.clone()),
        LinkRole::Recipient => entry.identity.clone(),
    };
    // A reassigned-away recipient sees the documents, not anyone's values.
    let (own_values, shared) = match role {
        LinkRole::Original => (None, Vec::new()),
        _ => (
            entry.signed_payload.clone(),
            shared_values(snapshot, entry.recipient_index),
        ),
    };
    let documents = group
        .documents
        .iter()
        .map(|d| DocumentView {
            document: d.clone(),
            signed: entry.signed_documents.contains(&d.document_id),
            fields: match role {
                LinkRole::Original => Vec::new(),
                _ => entry.fields_on(&d.document_id).cloned().collect(),
            },
        })
        .collect();
    let due_at = entry.due_at(group);

    LedgerView {
        group_id: group.group_id.clone(),
        title: group.title.clone(),
        group_status: group.status,
        signing_order: group.signing_order,
        view_mode: group.view_mode,
        link_role: role.as_str(),
        recipient_index: entry.recipient_index,
        identity,
        status: entry.status,
        allowed_actions: allowed_actions(snapshot, entry, role, now),
        documents,
        own_values,
        shared_values: shared,
        due_at,
        overdue: due_at.is_some_and(|due| now >= due),
        requires_verification: entry.access_policy.require_verification,
        delegated_to: entry.delegation.as_ref().map(|d| d.delegate.clone()),
        decline_reason: entry.decline_reason.clone(),
        cancel_reason: entry.cancel_reason.clone(),
    }
}

/// One recipient slot as seen by the owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientSummary {
    pub entry_id: String,
    pub recipient_index: u32,
    pub identity: Identity,
    pub status: RecipientStatus,
    pub signed_documents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reassigned_from: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// Finalization bookkeeping exposed to the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizationSummary {
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at_ms: Option<i64>,
}

/// What the owner sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group_id: String,
    pub title: String,
    pub status: GroupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub signing_order: SigningOrder,
    pub view_mode: ViewMode,
    pub documents: Vec<DocumentProgress>,
    pub recipients: Vec<RecipientSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub hard_cutoff: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub document_artifacts: BTreeMap<String, String>,
    pub finalization: FinalizationSummary,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Build the owner's summary of a group.
pub fn group_summary(snapshot: &GroupSnapshot) -> GroupSummary {
    let group = &snapshot.group;
    GroupSummary {
        group_id: group.group_id.clone(),
        title: group.title.clone(),
        status: group.status,
        status_reason: group.status_reason.clone(),
        signing_order: group.signing_order,
        view_mode: group.view_mode,
        documents: document_progress(group, &snapshot.entries),
        recipients: snapshot
            .entries
            .iter()
            .map(|e| RecipientSummary {
                entry_id: e.entry_id.clone(),
                recipient_index: e.recipient_index,
                identity: e.identity.clone(),
                status: e.status,
                signed_documents: e.signed_documents.iter().cloned().collect(),
                delegated_to: e.delegation.as_ref().map(|d| d.delegate.clone()),
                reassigned_from: e
                    .reassignments
                    .last()
                    .map(|r| r.original_identity.clone()),
                viewed_at: e.timestamps.viewed_at,
                signed_at: e.timestamps.signed_at,
                declined_at: e.timestamps.declined_at,
                cancelled_at: e.timestamps.cancelled_at,
                expired_at: e.timestamps.expired_at,
                decline_reason: e.decline_reason.clone(),
                cancel_reason: e.cancel_reason.clone(),
            })
            .collect(),
        due_at: group.expiration_policy.due_at,
        hard_cutoff: group.expiration_policy.hard_cutoff,
        artifact_ref: group.artifact_ref.clone(),
        document_artifacts: group.document_artifacts.clone(),
        finalization: FinalizationSummary {
            attempts: group.finalization.attempts,
            last_error: group.finalization.last_error.clone(),
            next_attempt_at_ms: group.finalization.next_attempt_at_ms,
        },
        created_at: group.created_at,
        completed_at: group.completed_at,
        declined_at: group.declined_at,
        cancelled_at: group.cancelled_at,
    }
}
