// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for countersign-core.
//!
//! Provides a unified error type whose variants map one-to-one onto the
//! error codes returned by the HTTP surface.

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while processing signing requests.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed action or missing required payload fields.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Unknown group, recipient link or ledger entry.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Kind of resource that was looked up.
        resource: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// The action is not valid from the current status.
    #[error("State conflict on '{subject}' in status '{status}': {message}")]
    StateConflict {
        /// Entry or group the action targeted.
        subject: String,
        /// Status observed when the action was rejected.
        status: String,
        /// Why the action was rejected.
        message: String,
    },

    /// Revoked or reassigned recipient, or an unmet access precondition.
    #[error("Access denied: {reason}")]
    AccessDenied {
        /// Why access was denied.
        reason: String,
    },

    /// An external collaborator (blob store, assembler, notifier) failed.
    #[error("Dependency '{dependency}' failed: {details}")]
    DependencyFailure {
        /// Which collaborator failed.
        dependency: &'static str,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::DependencyFailure { .. } => "DEPENDENCY_FAILURE",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Build a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a not-found error.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Build a state conflict error.
    pub fn conflict(
        subject: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StateConflict {
            subject: subject.into(),
            status: status.into(),
            message: message.into(),
        }
    }

    /// Build an access denied error.
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Build a dependency failure.
    pub fn dependency(dependency: &'static str, details: impl Into<String>) -> Self {
        Self::DependencyFailure {
            dependency,
            details: details.into(),
        }
    }

    /// Build a decode error for a malformed persisted column.
    pub(crate) fn decode(column: &str, details: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: "decode".to_string(),
            details: format!("column '{}': {}", column, details),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}
