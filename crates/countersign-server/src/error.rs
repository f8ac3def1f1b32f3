// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping.
//!
//! Every failure leaves the server as a JSON body `{code, message}` with a
//! status derived from the core error taxonomy.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use countersign_core::CoreError;

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Error raised by the signing engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A required header is missing or malformed.
    #[error("missing or invalid header '{0}'")]
    Header(&'static str),

    /// The request body could not be parsed.
    #[error("invalid request body: {0}")]
    Body(String),

    /// The caller is not allowed to use this endpoint.
    #[error("unauthorized")]
    Unauthorized,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Body(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e {
                CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::StateConflict { .. } => StatusCode::CONFLICT,
                CoreError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                CoreError::DependencyFailure { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Header(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Header(_) | Self::Body(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Database details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            code: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
