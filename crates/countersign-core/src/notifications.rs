// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fire-and-forget notification dispatch.
//!
//! Delivery failures are logged and swallowed; they never reach the caller
//! and never affect ledger state.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::collaborators::{Notification, NotificationKind, Notifier};
use crate::model::{Identity, LedgerEntry, RecipientStatus, RequestGroup};

/// Wraps a [`Notifier`] and builds messages from ledger state.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("notifier", &"...")
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send one notification; failures are logged.
    pub async fn dispatch(&self, notification: Notification) {
        match self.notifier.send(&notification).await {
            Ok(()) => debug!(
                kind = notification.kind.as_str(),
                group_id = %notification.group_id,
                "Notification sent"
            ),
            Err(e) => warn!(
                kind = notification.kind.as_str(),
                group_id = %notification.group_id,
                error = %e,
                "Notification delivery failed"
            ),
        }
    }

    /// Send several notifications in order.
    pub async fn dispatch_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.dispatch(notification).await;
        }
    }
}

/// Message to whoever currently acts on an entry, with their link.
pub fn to_recipient(
    kind: NotificationKind,
    group: &RequestGroup,
    entry: &LedgerEntry,
    data: Value,
) -> Notification {
    to_identity(
        kind,
        group,
        entry.acting_identity(),
        Some(acting_link_id(entry).to_string()),
        data,
    )
}

/// Link of whoever currently acts on an entry.
pub fn acting_link_id(entry: &LedgerEntry) -> &str {
    match &entry.delegation {
        Some(d) if entry.status == RecipientStatus::Delegated => &d.link_id,
        _ => &entry.link_id,
    }
}

/// Message to an arbitrary identity.
pub fn to_identity(
    kind: NotificationKind,
    group: &RequestGroup,
    identity: &Identity,
    link_id: Option<String>,
    data: Value,
) -> Notification {
    Notification {
        kind,
        to: identity.email.clone(),
        to_name: identity.name.clone(),
        group_id: group.group_id.clone(),
        link_id,
        data: with_title(group, data),
    }
}

/// Message to the group owner.
pub fn to_owner(kind: NotificationKind, group: &RequestGroup, data: Value) -> Notification {
    Notification {
        kind,
        to: group.owner.email.clone(),
        to_name: group.owner.name.clone(),
        group_id: group.group_id.clone(),
        link_id: None,
        data: with_title(group, data),
    }
}

fn with_title(group: &RequestGroup, data: Value) -> Value {
    match data {
        Value::Object(mut map) => {
            map.entry("title")
                .or_insert_with(|| Value::String(group.title.clone()));
            Value::Object(map)
        }
        Value::Null => json!({ "title": group.title }),
        other => json!({ "title": group.title, "data": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingNotifier;
    use crate::model::{
        AccessPolicy, Delegation, ExpirationPolicy, FinalizationState, GroupStatus,
        LedgerTimestamps, Owner, SigningOrder, VerificationState, ViewMode,
    };
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn group() -> RequestGroup {
        RequestGroup {
            group_id: "g-1".to_string(),
            owner: Owner {
                id: "owner-1".to_string(),
                name: "Olga".to_string(),
                email: "olga@example.com".to_string(),
            },
            title: "NDA".to_string(),
            documents: vec![],
            recipients: vec![],
            signing_order: SigningOrder::Any,
            view_mode: ViewMode::Isolated,
            status: GroupStatus::PendingSignature,
            status_reason: None,
            artifact_ref: None,
            document_artifacts: BTreeMap::new(),
            expiration_policy: ExpirationPolicy::default(),
            finalization: FinalizationState::default(),
            created_at: Utc::now(),
            completed_at: None,
            declined_at: None,
            cancelled_at: None,
        }
    }

    fn delegated_entry() -> LedgerEntry {
        LedgerEntry {
            entry_id: "e-1".to_string(),
            group_id: "g-1".to_string(),
            recipient_index: 0,
            link_id: "link-own".to_string(),
            identity: Identity::signer("Ann", "ann@example.com"),
            assigned_fields: vec![],
            status: RecipientStatus::Delegated,
            signed_documents: BTreeSet::new(),
            signed_payload: None,
            timestamps: LedgerTimestamps::default(),
            decline_reason: None,
            cancel_reason: None,
            access_policy: AccessPolicy::default(),
            verification: VerificationState::default(),
            delegation: Some(Delegation {
                delegate: Identity::signer("Dan", "dan@example.com"),
                link_id: "link-delegate".to_string(),
                delegated_at: Utc::now(),
            }),
            reassignments: Vec::new(),
        }
    }

    #[test]
    fn test_delegated_entry_notifies_delegate() {
        let n = to_recipient(
            NotificationKind::Reminder,
            &group(),
            &delegated_entry(),
            json!({}),
        );
        assert_eq!(n.to, "dan@example.com");
        assert_eq!(n.link_id.as_deref(), Some("link-delegate"));
        assert_eq!(n.data["title"], "NDA");
    }

    #[test]
    fn test_owner_message_keeps_data() {
        let n = to_owner(
            NotificationKind::RecipientSigned,
            &group(),
            json!({ "recipient_index": 2 }),
        );
        assert_eq!(n.to, "olga@example.com");
        assert_eq!(n.data["recipient_index"], 2);
        assert_eq!(n.data["title"], "NDA");
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier = RecordingNotifier::failing();
        let dispatcher = NotificationDispatcher::new(Arc::new(notifier.clone()));
        dispatcher
            .dispatch(to_owner(NotificationKind::Completed, &group(), Value::Null))
            .await;
        assert!(notifier.sent().await.is_empty());
    }
}
