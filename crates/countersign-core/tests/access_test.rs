// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for delegation, reassignment, access codes and verification.

mod common;

use chrono::{Duration, Utc};
use common::*;
use countersign_core::RecipientAction;
use countersign_core::access::LinkCredentials;
use countersign_core::collaborators::NotificationKind;
use countersign_core::model::{GroupStatus, Identity, RecipientStatus, SigningOrder, ViewMode};

fn credentials(access_code: Option<&str>, verification_code: Option<&str>) -> LinkCredentials {
    LinkCredentials {
        access_code: access_code.map(str::to_string),
        verification_code: verification_code.map(str::to_string),
    }
}

#[tokio::test]
async fn test_delegate_signs_on_behalf_of_recipient() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();

    let created = ctx
        .create(
            simple_request(
                vec![
                    recipient("Ann", "ann@example.com"),
                    recipient("Bob", "bob@example.com"),
                ],
                SigningOrder::Sequential,
            ),
            Utc::now(),
        )
        .await;
    let link_ann = link(&created, 0);

    // 1. Self-delegation is refused
    let err = engine
        .submit_action(
            &link_ann,
            &no_credentials(),
            RecipientAction::Delegate {
                delegate: Identity::signer("Ann again", "ANN@example.com"),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // 2. Ann forwards to Dan; the link only travels by notification
    let outcome = engine
        .submit_action(
            &link_ann,
            &no_credentials(),
            RecipientAction::Delegate {
                delegate: Identity::signer("Dan", "dan@example.com"),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RecipientStatus::Delegated);

    let delegated = ctx.notifier.sent_of(NotificationKind::Delegated).await;
    let to_dan = delegated.iter().find(|n| n.to == "dan@example.com").unwrap();
    let link_dan = to_dan.link_id.clone().unwrap();
    assert!(delegated.iter().any(|n| n.to == "olga@example.com"));

    // 3. Ann keeps view-only access
    let view = engine.get_status(&link_ann, &no_credentials()).await.unwrap();
    assert_eq!(view.status, RecipientStatus::Delegated);
    assert_eq!(view.allowed_actions, vec!["view"]);
    let err = engine
        .submit_action(&link_ann, &no_credentials(), sign(values(&[])))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STATE_CONFLICT");

    // 4. Dan cannot re-delegate but can sign
    let view = engine.get_status(&link_dan, &no_credentials()).await.unwrap();
    assert_eq!(view.link_role, "delegate");
    assert!(view.allowed_actions.contains(&"sign"));
    let err = engine
        .submit_action(
            &link_dan,
            &no_credentials(),
            RecipientAction::Delegate {
                delegate: Identity::signer("Eve", "eve@example.com"),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let outcome = engine
        .submit_action(&link_dan, &no_credentials(), sign(values(&[])))
        .await
        .unwrap();
    assert_eq!(outcome.status, RecipientStatus::Signed);
    assert_eq!(outcome.activated_index, Some(1));

    let summary = ctx.summary(&created.group_id).await;
    assert_eq!(
        summary.recipients[0].delegated_to.as_ref().map(|i| i.email.as_str()),
        Some("dan@example.com")
    );
    assert_eq!(summary.recipients[1].status, RecipientStatus::Pending);
}

#[tokio::test]
async fn test_reassign_with_original_view() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();

    let created = ctx
        .create(
            simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
            Utc::now(),
        )
        .await;
    let old_link = link(&created, 0);

    let new = engine
        .reassign(
            OWNER_ID,
            &created.group_id,
            0,
            Identity::signer("Zoe", "zoe@example.com"),
            true,
        )
        .await
        .unwrap();
    assert_ne!(new.link_id, old_link);
    assert_eq!(new.status, RecipientStatus::Pending);
    assert_eq!(ctx.notifier.count(NotificationKind::Reassigned, "zoe@example.com").await, 1);

    // 1. The old link still resolves, read-only
    let view = engine.get_status(&old_link, &no_credentials()).await.unwrap();
    assert_eq!(view.link_role, "original");
    assert!(view.allowed_actions.is_empty());
    assert!(view.own_values.is_none());
    let err = engine
        .submit_action(&old_link, &no_credentials(), sign(values(&[])))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    // 2. The new holder completes the group
    let outcome = engine
        .submit_action(&new.link_id, &no_credentials(), sign(values(&[])))
        .await
        .unwrap();
    assert_eq!(outcome.group_status, GroupStatus::Completed);

    let summary = ctx.summary(&created.group_id).await;
    assert_eq!(summary.recipients[0].identity.email, "zoe@example.com");
    assert_eq!(
        summary.recipients[0].reassigned_from.as_ref().map(|i| i.email.as_str()),
        Some("ann@example.com")
    );
}

#[tokio::test]
async fn test_second_reassignment_keeps_every_retired_link() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();
    let now = Utc::now();

    let mut req = request(
        vec![
            recipient("Ann", "ann@example.com"),
            recipient("Bob", "bob@example.com"),
        ],
        vec![document("doc-1", 1)],
        vec![
            signature_field("sig-ann", "doc-1", 0),
            signature_field("sig-bob", "doc-1", 1),
        ],
        SigningOrder::Any,
    );
    req.view_mode = ViewMode::Shared;
    let created = ctx.create(req, now).await;
    let ann_link = link(&created, 0);
    engine
        .submit_action_at(
            &link(&created, 1),
            &no_credentials(),
            sign(values(&[("sig-bob", "Bob B.")])),
            now,
        )
        .await
        .unwrap();

    let zoe = engine
        .reassign_at(
            OWNER_ID,
            &created.group_id,
            0,
            Identity::signer("Zoe", "zoe@example.com"),
            true,
            now + Duration::hours(1),
        )
        .await
        .unwrap();
    let yan = engine
        .reassign_at(
            OWNER_ID,
            &created.group_id,
            0,
            Identity::signer("Yan", "yan@example.com"),
            false,
            now + Duration::hours(2),
        )
        .await
        .unwrap();

    // 1. Ann's link stays read-only, shows Ann and no values
    let view = engine.get_status(&ann_link, &no_credentials()).await.unwrap();
    assert_eq!(view.link_role, "original");
    assert_eq!(view.identity.email, "ann@example.com");
    assert!(view.allowed_actions.is_empty());
    assert!(view.shared_values.is_empty());
    assert!(view.own_values.is_none());

    // 2. Zoe's link was retired without view permission
    let err = engine
        .get_status(&zoe.link_id, &no_credentials())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    // 3. Yan holds the slot and sees Bob's value
    let view = engine.get_status(&yan.link_id, &no_credentials()).await.unwrap();
    assert_eq!(view.link_role, "recipient");
    assert_eq!(view.identity.email, "yan@example.com");
    assert_eq!(view.shared_values.len(), 1);

    let summary = ctx.summary(&created.group_id).await;
    assert_eq!(
        summary.recipients[0].reassigned_from.as_ref().map(|i| i.email.as_str()),
        Some("zoe@example.com")
    );
}

#[tokio::test]
async fn test_reassign_revokes_original_link() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();

    let mut ann = recipient("Ann", "ann@example.com");
    ann.access_code = Some("4821".to_string());
    let created = ctx
        .create(simple_request(vec![ann], SigningOrder::Any), Utc::now())
        .await;
    let old_link = link(&created, 0);

    // 1. Only the owner may reassign
    let err = engine
        .reassign(
            "someone-else",
            &created.group_id,
            0,
            Identity::signer("Zoe", "zoe@example.com"),
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let new = engine
        .reassign(
            OWNER_ID,
            &created.group_id,
            0,
            Identity::signer("Zoe", "zoe@example.com"),
            false,
        )
        .await
        .unwrap();

    // 2. The old link is refused even with the right access code
    let err = engine
        .get_status(&old_link, &credentials(Some("4821"), None))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    // 3. The access code went with the old holder
    let view = engine.get_status(&new.link_id, &no_credentials()).await.unwrap();
    assert_eq!(view.identity.email, "zoe@example.com");
}

#[tokio::test]
async fn test_reassign_unknown_slot_is_not_found() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create(
            simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
            Utc::now(),
        )
        .await;
    let err = ctx
        .engine()
        .reassign(
            OWNER_ID,
            &created.group_id,
            5,
            Identity::signer("Zoe", "zoe@example.com"),
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_access_code_required() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();

    let mut ann = recipient("Ann", "ann@example.com");
    ann.access_code = Some("4821".to_string());
    let created = ctx
        .create(simple_request(vec![ann], SigningOrder::Any), Utc::now())
        .await;
    let link_ann = link(&created, 0);

    let err = engine.get_status(&link_ann, &no_credentials()).await.unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");
    let err = engine
        .submit_action(&link_ann, &credentials(Some("0000"), None), sign(values(&[])))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let outcome = engine
        .submit_action(&link_ann, &credentials(Some(" 4821 "), None), sign(values(&[])))
        .await
        .unwrap();
    assert_eq!(outcome.status, RecipientStatus::Signed);
}

#[tokio::test]
async fn test_short_access_code_rejected_at_creation() {
    let ctx = TestContext::new().await;
    let mut ann = recipient("Ann", "ann@example.com");
    ann.access_code = Some("12".to_string());
    let err = ctx
        .engine()
        .create_group_at(owner(), simple_request(vec![ann], SigningOrder::Any), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_verification_code_gates_sign() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine();
    let now = Utc::now();

    let mut ann = recipient("Ann", "ann@example.com");
    ann.require_verification = true;
    let created = ctx
        .create(simple_request(vec![ann], SigningOrder::Any), now)
        .await;
    let link_ann = link(&created, 0);

    // 1. Signing without a code
    let err = engine
        .submit_action_at(&link_ann, &no_credentials(), sign(values(&[])), now)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    // 2. Issue a code; it is delivered to the recipient only
    let issued = engine
        .request_verification_at(&link_ann, &no_credentials(), now)
        .await
        .unwrap();
    assert_eq!(issued.sent_to, "ann@example.com");
    assert_eq!(issued.expires_at, now + Duration::minutes(10));
    let sent = ctx.notifier.sent_of(NotificationKind::VerificationCode).await;
    assert_eq!(sent.len(), 1);
    let code = sent[0].data["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    // 3. Expired codes are refused
    let err = engine
        .submit_action_at(
            &link_ann,
            &credentials(None, Some(&code)),
            sign(values(&[])),
            now + Duration::minutes(11),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    // 4. A wrong code is refused, the right one accepted
    let wrong = if code == "000000" { "000001" } else { "000000" };
    let err = engine
        .submit_action_at(&link_ann, &credentials(None, Some(wrong)), sign(values(&[])), now)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let outcome = engine
        .submit_action_at(
            &link_ann,
            &credentials(None, Some(&code)),
            sign(values(&[])),
            now + Duration::minutes(1),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RecipientStatus::Signed);
}

#[tokio::test]
async fn test_verification_not_required_is_validation_error() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create(
            simple_request(vec![recipient("Ann", "ann@example.com")], SigningOrder::Any),
            Utc::now(),
        )
        .await;
    let err = ctx
        .engine()
        .request_verification(&link(&created, 0), &no_credentials())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}
