// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the reminder, due warning and expiration sweep.

mod common;

use chrono::{Duration, Utc};
use common::*;
use countersign_core::collaborators::NotificationKind;
use countersign_core::config::EngineConfig;
use countersign_core::model::{Identity, RecipientStatus, SigningOrder};

#[tokio::test]
async fn test_reminders_sent_at_most_once_per_threshold() {
    let ctx = TestContext::new().await;
    let scheduler = ctx.runtime.scheduler();
    let created_at = Utc::now();

    let created = ctx
        .create(
            simple_request(
                vec![
                    recipient("Ann", "ann@example.com"),
                    recipient("Bob", "bob@example.com"),
                ],
                SigningOrder::Any,
            ),
            created_at,
        )
        .await;
    ctx.engine()
        .submit_action_at(
            &link(&created, 0),
            &no_credentials(),
            sign(values(&[])),
            created_at,
        )
        .await
        .unwrap();

    // 1. Nothing is due yet
    let report = scheduler.sweep_at(created_at + Duration::days(1)).await.unwrap();
    assert_eq!(report.groups_scanned, 1);
    assert_eq!(report.reminders_sent, 0);

    // 2. The 3-day reminder goes to Bob only, once across overlapping sweeps
    let day4 = created_at + Duration::days(4);
    let (first, second) = futures::join!(scheduler.sweep_at(day4), scheduler.sweep_at(day4));
    assert_eq!(first.unwrap().reminders_sent + second.unwrap().reminders_sent, 1);
    let reminders = ctx.notifier.sent_of(NotificationKind::Reminder).await;
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].to, "bob@example.com");
    assert_eq!(reminders[0].link_id.as_deref(), Some(link(&created, 1).as_str()));

    // 3. The 7-day reminder follows
    let report = scheduler.sweep_at(created_at + Duration::days(8)).await.unwrap();
    assert_eq!(report.reminders_sent, 1);
    assert_eq!(ctx.notifier.count(NotificationKind::Reminder, "bob@example.com").await, 2);
}

#[tokio::test]
async fn test_skipped_thresholds_collapse_into_one_reminder() {
    let ctx = TestContext::new().await;
    let created_at = Utc::now();
    ctx.create(
        simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
        created_at,
    )
    .await;

    let scheduler = ctx.runtime.scheduler();
    let report = scheduler.sweep_at(created_at + Duration::days(10)).await.unwrap();
    assert_eq!(report.reminders_sent, 1);
    let reminders = ctx.notifier.sent_of(NotificationKind::Reminder).await;
    assert_eq!(reminders[0].data["days_since_issued"], 7);

    let report = scheduler.sweep_at(created_at + Duration::days(11)).await.unwrap();
    assert_eq!(report.reminders_sent, 0);
}

#[tokio::test]
async fn test_sequential_waiting_recipients_get_no_reminders() {
    let ctx = TestContext::new().await;
    let created_at = Utc::now();
    ctx.create(
        simple_request(three_recipients(), SigningOrder::Sequential),
        created_at,
    )
    .await;

    let report = ctx
        .runtime
        .scheduler()
        .sweep_at(created_at + Duration::days(4))
        .await
        .unwrap();
    assert_eq!(report.reminders_sent, 1);
    assert_eq!(ctx.notifier.count(NotificationKind::Reminder, "ann@example.com").await, 1);
}

#[tokio::test]
async fn test_activated_recipient_reminder_counts_from_activation() {
    let ctx = TestContext::new().await;
    let scheduler = ctx.runtime.scheduler();
    let created_at = Utc::now();
    let created = ctx
        .create(
            simple_request(
                vec![
                    recipient("Ann", "ann@example.com"),
                    recipient("Bob", "bob@example.com"),
                ],
                SigningOrder::Sequential,
            ),
            created_at,
        )
        .await;

    // Ann takes five days; Bob's turn starts then
    let activated_at = created_at + Duration::days(5);
    ctx.engine()
        .submit_action_at(
            &link(&created, 0),
            &no_credentials(),
            sign(values(&[])),
            activated_at,
        )
        .await
        .unwrap();

    let report = scheduler.sweep_at(activated_at + Duration::hours(2)).await.unwrap();
    assert_eq!(report.reminders_sent, 0);
    assert_eq!(ctx.notifier.count(NotificationKind::Reminder, "bob@example.com").await, 0);

    let report = scheduler
        .sweep_at(activated_at + Duration::days(3) + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.reminders_sent, 1);
    let reminders = ctx.notifier.sent_of(NotificationKind::Reminder).await;
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].to, "bob@example.com");
    assert_eq!(reminders[0].data["days_since_issued"], 3);
}

#[tokio::test]
async fn test_reassigned_holder_reminder_counts_from_reassignment() {
    let ctx = TestContext::new().await;
    let scheduler = ctx.runtime.scheduler();
    let created_at = Utc::now();
    let created = ctx
        .create(
            simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
            created_at,
        )
        .await;

    let reassigned_at = created_at + Duration::days(5);
    ctx.engine()
        .reassign_at(
            OWNER_ID,
            &created.group_id,
            0,
            Identity::signer("Dora", "dora@example.com"),
            false,
            reassigned_at,
        )
        .await
        .unwrap();

    let report = scheduler
        .sweep_at(reassigned_at + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.reminders_sent, 0);

    let report = scheduler
        .sweep_at(reassigned_at + Duration::days(3) + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.reminders_sent, 1);
    assert_eq!(ctx.notifier.count(NotificationKind::Reminder, "dora@example.com").await, 1);
    assert_eq!(ctx.notifier.count(NotificationKind::Reminder, "ann@example.com").await, 0);
}

#[tokio::test]
async fn test_due_warnings_and_expiration() {
    let config = EngineConfig {
        reminder_after_days: vec![],
        ..EngineConfig::default()
    };
    let ctx = TestContext::with(Default::default(), config).await;
    let scheduler = ctx.runtime.scheduler();
    let created_at = Utc::now();

    let mut req = simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any);
    req.due_at = Some(created_at + Duration::days(10));
    let created = ctx.create(req, created_at).await;

    // 1. Seven days out
    let report = scheduler.sweep_at(created_at + Duration::days(4)).await.unwrap();
    assert_eq!(report.due_warnings_sent, 1);
    let report = scheduler.sweep_at(created_at + Duration::days(5)).await.unwrap();
    assert_eq!(report.due_warnings_sent, 0);

    // 2. One day out
    let report = scheduler
        .sweep_at(created_at + Duration::days(9) + Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(report.due_warnings_sent, 1);
    let warnings = ctx.notifier.sent_of(NotificationKind::DueWarning).await;
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[1].data["days_before"], 1);

    // 3. Past due: annotated once, owner and recipient told
    let report = scheduler.sweep_at(created_at + Duration::days(11)).await.unwrap();
    assert_eq!(report.entries_expired, 1);
    let report = scheduler.sweep_at(created_at + Duration::days(12)).await.unwrap();
    assert_eq!(report.entries_expired, 0);

    assert_eq!(ctx.notifier.count(NotificationKind::Expired, "olga@example.com").await, 1);
    assert_eq!(ctx.notifier.count(NotificationKind::Expired, "ann@example.com").await, 1);

    // 4. Without a hard cutoff the recipient can still sign
    let summary = ctx.summary(&created.group_id).await;
    assert!(summary.recipients[0].expired_at.is_some());
    assert_eq!(summary.recipients[0].status, RecipientStatus::Pending);
    let outcome = ctx
        .engine()
        .submit_action_at(
            &link(&created, 0),
            &no_credentials(),
            sign(values(&[])),
            created_at + Duration::days(12),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RecipientStatus::Signed);
}

#[tokio::test]
async fn test_hard_cutoff_refuses_late_signatures() {
    let ctx = TestContext::new().await;
    let created_at = Utc::now();

    let mut req = simple_request(
        vec![
            recipient("Ann", "ann@example.com"),
            recipient("Bob", "bob@example.com"),
        ],
        SigningOrder::Any,
    );
    req.due_at = Some(created_at + Duration::days(2));
    req.hard_cutoff = true;
    let created = ctx.create(req, created_at).await;

    let late = created_at + Duration::days(3);
    let err = ctx
        .engine()
        .submit_action_at(&link(&created, 0), &no_credentials(), sign(values(&[])), late)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STATE_CONFLICT");
    let err = ctx
        .engine()
        .submit_action_at(&link(&created, 0), &no_credentials(), view(), late)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STATE_CONFLICT");

    // Declining past the cutoff is still possible
    ctx.engine()
        .submit_action_at(
            &link(&created, 1),
            &no_credentials(),
            decline("Missed the deadline"),
            late,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sweep_recovers_stuck_completion() {
    use countersign_core::persistence::SignatureWrite;
    use countersign_core::persistence::encode_signed_documents;
    use std::collections::BTreeSet;

    let ctx = TestContext::new().await;
    let created_at = Utc::now();
    let created = ctx
        .create(
            simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
            created_at,
        )
        .await;

    // A signature committed without the completion check that normally follows it
    let empty = encode_signed_documents(&BTreeSet::new()).unwrap();
    let signed = encode_signed_documents(&BTreeSet::from(["doc-1".to_string()])).unwrap();
    let result = ctx
        .runtime
        .persistence()
        .record_signature(&SignatureWrite {
            group_id: &created.group_id,
            entry_id: &created.recipients[0].entry_id,
            expected_status: RecipientStatus::Pending,
            expected_signed_documents: &empty,
            new_status: RecipientStatus::Signed,
            signed_documents: &signed,
            signed_payload: "{}",
            fully_signed: true,
            verified: false,
            activate_index: None,
            now: created_at,
        })
        .await
        .unwrap();
    assert!(result.applied);
    assert_eq!(ctx.assembler.compose_calls(), 0);

    let report = ctx
        .runtime
        .scheduler()
        .sweep_at(created_at + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.completions_recovered, 1);
    assert_eq!(ctx.assembler.compose_calls(), 1);
    assert!(ctx.summary(&created.group_id).await.artifact_ref.is_some());
}
