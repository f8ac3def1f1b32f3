// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request extractors for owner identity, link credentials and the scheduler secret.
//!
//! Owner authentication happens upstream; the gateway forwards the
//! authenticated owner in `X-Owner-Id`.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use countersign_core::access::LinkCredentials;
use countersign_core::collaborators::ViewContext;

use crate::error::ApiError;
use crate::state::AppState;

pub const OWNER_ID_HEADER: &str = "x-owner-id";
pub const ACCESS_CODE_HEADER: &str = "x-access-code";
pub const VERIFICATION_CODE_HEADER: &str = "x-verification-code";
pub const SCHEDULER_SECRET_HEADER: &str = "x-scheduler-secret";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The authenticated owner.
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header(&parts.headers, OWNER_ID_HEADER)
            .map(|id| OwnerId(id.to_string()))
            .ok_or(ApiError::Header("X-Owner-Id"))
    }
}

/// Caller presented the scheduler secret.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerAuth;

impl FromRequestParts<AppState> for SchedulerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match header(&parts.headers, SCHEDULER_SECRET_HEADER) {
            Some(secret) if state.scheduler_secret_matches(secret) => Ok(SchedulerAuth),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

/// Credentials from headers, used when the body does not carry them.
pub fn credentials_from(
    headers: &HeaderMap,
    access_code: Option<String>,
    verification_code: Option<String>,
) -> LinkCredentials {
    LinkCredentials {
        access_code: access_code
            .or_else(|| header(headers, ACCESS_CODE_HEADER).map(str::to_string)),
        verification_code: verification_code
            .or_else(|| header(headers, VERIFICATION_CODE_HEADER).map(str::to_string)),
    }
}

/// Fill missing view context fields from the request.
pub fn view_context_from(headers: &HeaderMap, mut context: ViewContext) -> ViewContext {
    if context.user_agent.is_none() {
        context.user_agent = header(headers, "user-agent").map(str::to_string);
    }
    if context.ip.is_none() {
        context.ip = header(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string());
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_body_credentials_win_over_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CODE_HEADER, HeaderValue::from_static("from-header"));
        headers.insert(VERIFICATION_CODE_HEADER, HeaderValue::from_static("123456"));

        let creds = credentials_from(&headers, Some("from-body".to_string()), None);
        assert_eq!(creds.access_code.as_deref(), Some("from-body"));
        assert_eq!(creds.verification_code.as_deref(), Some("123456"));
    }

    #[test]
    fn test_view_context_from_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        let context = view_context_from(&headers, ViewContext::default());
        assert_eq!(context.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(context.ip.as_deref(), Some("203.0.113.7"));
    }
}
