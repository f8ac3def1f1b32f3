// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Collaborator trait definitions.
//!
//! The engine talks to everything outside the ledger through these seams:
//! document bytes ([`BlobStore`]), signed artifact composition
//! ([`ArtifactAssembler`]), outbound messages ([`Notifier`]) and view
//! analytics ([`ViewTelemetry`]).

pub mod fs;
pub mod log;
pub mod manifest;
pub mod memory;

pub use self::fs::FsBlobStore;
pub use self::log::LogNotifier;
pub use self::manifest::ManifestAssembler;
pub use self::memory::{
    MemoryBlobStore, RecordingAssembler, RecordingNotifier, RecordingTelemetry,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;
use crate::model::{DocumentRef, Identity, RequestGroup, SignedPayload};

// ============================================================================
// Blob store
// ============================================================================

/// Errors from blob store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobStoreError {
    /// No blob with this reference.
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// The reference is not one this store issues.
    #[error("Invalid blob reference: {0}")]
    InvalidRef(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Metadata stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    /// MIME type of the bytes.
    pub content_type: String,
    /// Human-readable name.
    pub display_name: String,
}

/// Storage for document bytes and finalized artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the bytes behind a reference.
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Store bytes and return their reference.
    async fn put(&self, bytes: Vec<u8>, meta: &BlobMeta) -> Result<String, BlobStoreError>;
}

impl From<BlobStoreError> for CoreError {
    fn from(err: BlobStoreError) -> Self {
        CoreError::dependency("blob_store", err.to_string())
    }
}

// ============================================================================
// Artifact assembler
// ============================================================================

/// Errors from artifact composition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssemblerError {
    /// Reading a source document or writing the artifact failed.
    #[error("Blob store: {0}")]
    Blob(#[from] BlobStoreError),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl From<AssemblerError> for CoreError {
    fn from(err: AssemblerError) -> Self {
        CoreError::dependency("artifact_assembler", err.to_string())
    }
}

/// One signer's contribution to a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignerRecord {
    /// Slot position.
    pub recipient_index: u32,
    /// Who signed.
    pub identity: Identity,
    /// Identity the slot was delegated from, if the signer is a delegate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<Identity>,
    /// When the slot became fully signed.
    pub signed_at: Option<DateTime<Utc>>,
    /// Values for the fields on this document only.
    pub values: SignedPayload,
}

/// Composes source documents and signed values into finalized artifacts.
#[async_trait]
pub trait ArtifactAssembler: Send + Sync {
    /// Compose one document with every signer's values; returns a blob reference.
    async fn compose(
        &self,
        group: &RequestGroup,
        document: &DocumentRef,
        signers: &[SignerRecord],
    ) -> Result<String, AssemblerError>;

    /// Compose the envelope-level artifact from per-document artifacts.
    async fn compose_envelope(
        &self,
        group: &RequestGroup,
        document_artifacts: &BTreeMap<String, String>,
        signers: &[SignerRecord],
    ) -> Result<String, AssemblerError>;
}

// ============================================================================
// Notifier
// ============================================================================

/// Kinds of outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Initial request sent to an eligible recipient.
    SignatureRequest,
    /// Sequential successor became eligible.
    YourTurn,
    /// Owner: a recipient signed.
    RecipientSigned,
    /// A recipient declined.
    Declined,
    /// The recipient's entry was cancelled.
    Cancelled,
    /// Every recipient signed and the artifact is ready.
    Completed,
    /// Periodic reminder.
    Reminder,
    /// Due date is approaching.
    DueWarning,
    /// Due date passed.
    Expired,
    /// A slot was delegated to the addressee.
    Delegated,
    /// The addressee now holds a reassigned slot.
    Reassigned,
    /// One-time verification code.
    VerificationCode,
    /// Owner: artifact assembly failed and will be retried.
    FinalizationFailed,
}

impl NotificationKind {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureRequest => "signature_request",
            Self::YourTurn => "your_turn",
            Self::RecipientSigned => "recipient_signed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Reminder => "reminder",
            Self::DueWarning => "due_warning",
            Self::Expired => "expired",
            Self::Delegated => "delegated",
            Self::Reassigned => "reassigned",
            Self::VerificationCode => "verification_code",
            Self::FinalizationFailed => "finalization_failed",
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// What happened.
    pub kind: NotificationKind,
    /// Destination address.
    pub to: String,
    /// Addressee display name.
    pub to_name: String,
    /// Group the message concerns.
    pub group_id: String,
    /// Link the addressee should open, when they have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    /// Template data.
    pub data: serde_json::Value,
}

/// Errors from notification delivery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    /// The transport refused the message.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The transport is unreachable.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Outbound message transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

// ============================================================================
// View telemetry
// ============================================================================

/// Client details supplied with a `view`; forwarded to telemetry only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A recipient opened a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEvent {
    pub group_id: String,
    pub entry_id: String,
    pub recipient_index: u32,
    /// `recipient`, `delegate` or `original`.
    pub link_role: &'static str,
    pub viewed_at: DateTime<Utc>,
    pub context: ViewContext,
}

/// Hook invoked on every successful view; never fails the request.
#[async_trait]
pub trait ViewTelemetry: Send + Sync {
    /// Record one view.
    async fn record_view(&self, event: &ViewEvent);
}

/// Telemetry sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

#[async_trait]
impl ViewTelemetry for NoopTelemetry {
    async fn record_view(&self, _event: &ViewEvent) {}
}
