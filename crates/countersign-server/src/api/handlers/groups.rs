// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Owner operations on request groups.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use countersign_core::model::{Identity, Owner};
use countersign_core::projection::GroupSummary;
use countersign_core::{CreateGroupRequest, CreatedGroup, RecipientLink};

use crate::error::ApiResult;
use crate::extract::OwnerId;
use crate::state::AppState;

/// Owner contact details; the id comes from `X-Owner-Id`.
#[derive(Debug, Deserialize)]
pub struct OwnerContact {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupPayload {
    pub owner: OwnerContact,
    #[serde(flatten)]
    pub request: CreateGroupRequest,
}

#[derive(Debug, Deserialize)]
pub struct CancelGroupPayload {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReassignPayload {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(default)]
    pub allow_original_view: bool,
}

/// Create a group and return the recipient links.
pub async fn create_group(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    payload: Result<Json<CreateGroupPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedGroup>)> {
    let Json(payload) = payload?;
    let owner = Owner {
        id: owner_id,
        name: payload.owner.name,
        email: payload.owner.email,
    };
    let created = state
        .runtime
        .engine()
        .create_group(owner, payload.request)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_group(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    group_id: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<GroupSummary>> {
    let Path(group_id) = group_id?;
    let summary = state
        .runtime
        .engine()
        .get_group_summary(&owner_id, &group_id)
        .await?;
    Ok(Json(summary))
}

pub async fn cancel_group(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    group_id: Result<Path<String>, PathRejection>,
    payload: Result<Json<CancelGroupPayload>, JsonRejection>,
) -> ApiResult<Json<GroupSummary>> {
    let Path(group_id) = group_id?;
    let Json(payload) = payload?;
    let summary = state
        .runtime
        .engine()
        .cancel_group(&owner_id, &group_id, &payload.reason)
        .await?;
    Ok(Json(summary))
}

pub async fn delete_group(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    group_id: Result<Path<String>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(group_id) = group_id?;
    state
        .runtime
        .engine()
        .delete_group(&owner_id, &group_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the identity holding a recipient slot.
pub async fn reassign_recipient(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    path: Result<Path<(String, u32)>, PathRejection>,
    payload: Result<Json<ReassignPayload>, JsonRejection>,
) -> ApiResult<Json<RecipientLink>> {
    let Path((group_id, index)) = path?;
    let Json(payload) = payload?;
    let link = state
        .runtime
        .engine()
        .reassign(
            &owner_id,
            &group_id,
            index,
            payload.identity,
            payload.allow_original_view,
        )
        .await?;
    Ok(Json(link))
}
