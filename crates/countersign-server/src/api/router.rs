// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API Router configuration

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Owner operations
        .route("/groups", post(handlers::create_group))
        .route(
            "/groups/{group_id}",
            get(handlers::get_group).delete(handlers::delete_group),
        )
        .route("/groups/{group_id}/cancel", post(handlers::cancel_group))
        .route(
            "/groups/{group_id}/recipients/{index}/reassign",
            post(handlers::reassign_recipient),
        )
        // Recipient links
        .route("/links/{link_id}", get(handlers::get_link))
        .route("/links/{link_id}/actions", post(handlers::submit_action))
        .route(
            "/links/{link_id}/verification",
            post(handlers::request_verification),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/internal/scheduler/sweep", post(handlers::run_sweep))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
