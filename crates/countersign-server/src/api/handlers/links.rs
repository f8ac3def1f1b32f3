// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recipient link handlers.
//!
//! Credentials may be sent in the JSON body or as `X-Access-Code` and
//! `X-Verification-Code` headers; the body wins.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use countersign_core::engine::VerificationIssued;
use countersign_core::projection::LedgerView;
use countersign_core::{ActionOutcome, RecipientAction};

use crate::error::ApiResult;
use crate::extract::{credentials_from, view_context_from};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActionPayload {
    #[serde(flatten)]
    pub action: RecipientAction,
    #[serde(default)]
    pub access_code: Option<String>,
    #[serde(default)]
    pub verification_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerificationPayload {
    #[serde(default)]
    pub access_code: Option<String>,
}

pub async fn get_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    link_id: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<LedgerView>> {
    let Path(link_id) = link_id?;
    let credentials = credentials_from(&headers, None, None);
    let view = state
        .runtime
        .engine()
        .get_status(&link_id, &credentials)
        .await?;
    Ok(Json(view))
}

/// Submit view, sign, decline or delegate.
pub async fn submit_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    link_id: Result<Path<String>, PathRejection>,
    payload: Result<Json<ActionPayload>, JsonRejection>,
) -> ApiResult<Json<ActionOutcome>> {
    let Path(link_id) = link_id?;
    let Json(payload) = payload?;
    let credentials = credentials_from(&headers, payload.access_code, payload.verification_code);
    let action = match payload.action {
        RecipientAction::View { context } => RecipientAction::View {
            context: view_context_from(&headers, context),
        },
        other => other,
    };
    let outcome = state
        .runtime
        .engine()
        .submit_action(&link_id, &credentials, action)
        .await?;
    Ok(Json(outcome))
}

/// Issue a one-time verification code. The body is optional.
pub async fn request_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    link_id: Result<Path<String>, PathRejection>,
    payload: Option<Json<VerificationPayload>>,
) -> ApiResult<Json<VerificationIssued>> {
    let Path(link_id) = link_id?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let credentials = credentials_from(&headers, payload.access_code, None);
    let issued = state
        .runtime
        .engine()
        .request_verification(&link_id, &credentials)
        .await?;
    Ok(Json(issued))
}
