// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory collaborators for tests and embedded use.
//!
//! Each one records what it was asked to do and can be switched into a
//! failing mode, so engine behaviour under collaborator outages is testable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{
    ArtifactAssembler, AssemblerError, BlobMeta, BlobStore, BlobStoreError, Notification,
    NotificationKind, Notifier, NotifyError, SignerRecord, ViewEvent, ViewTelemetry,
};
use crate::model::{DocumentRef, RequestGroup};

/// Blob store backed by a map; references are `mem:<sha256>`.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, (Vec<u8>, BlobMeta)>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of a stored blob.
    pub async fn meta(&self, blob_ref: &str) -> Option<BlobMeta> {
        self.blobs.lock().await.get(blob_ref).map(|(_, m)| m.clone())
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.blobs
            .lock()
            .await
            .get(blob_ref)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| BlobStoreError::NotFound(blob_ref.to_string()))
    }

    async fn put(&self, bytes: Vec<u8>, meta: &BlobMeta) -> Result<String, BlobStoreError> {
        let digest = Sha256::digest(&bytes);
        let blob_ref = format!("mem:{}", hex::encode(digest));
        self.blobs
            .lock()
            .await
            .insert(blob_ref.clone(), (bytes, meta.clone()));
        Ok(blob_ref)
    }
}

/// Notifier that keeps every message it is given.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose transport is down.
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    /// Switch the failing mode on or off.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every message accepted so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Messages of one kind.
    pub async fn sent_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Messages of one kind addressed to `to`.
    pub async fn count(&self, kind: NotificationKind, to: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind == kind && n.to == to)
            .count()
    }

    /// Forget everything recorded so far.
    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("recording notifier set to fail".into()));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Assembler that returns deterministic references and counts its calls.
#[derive(Debug, Default, Clone)]
pub struct RecordingAssembler {
    compose_calls: Arc<AtomicUsize>,
    envelope_calls: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingAssembler {
    /// Create an assembler that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler whose next `n` compose calls fail.
    pub fn failing_times(n: usize) -> Self {
        let assembler = Self::default();
        assembler.failures_left.store(n, Ordering::SeqCst);
        assembler
    }

    /// Number of per-document compose calls, failed ones included.
    pub fn compose_calls(&self) -> usize {
        self.compose_calls.load(Ordering::SeqCst)
    }

    /// Number of envelope compose calls.
    pub fn envelope_calls(&self) -> usize {
        self.envelope_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactAssembler for RecordingAssembler {
    async fn compose(
        &self,
        group: &RequestGroup,
        document: &DocumentRef,
        signers: &[SignerRecord],
    ) -> Result<String, AssemblerError> {
        self.compose_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AssemblerError::Other("assembler unavailable".into()));
        }
        Ok(format!(
            "artifact:{}:{}:{}",
            group.group_id,
            document.document_id,
            signers.len()
        ))
    }

    async fn compose_envelope(
        &self,
        group: &RequestGroup,
        document_artifacts: &BTreeMap<String, String>,
        _signers: &[SignerRecord],
    ) -> Result<String, AssemblerError> {
        self.envelope_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "envelope:{}:{}",
            group.group_id,
            document_artifacts.len()
        ))
    }
}

/// Telemetry sink that keeps every view event.
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<ViewEvent>>>,
}

impl RecordingTelemetry {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    pub async fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ViewTelemetry for RecordingTelemetry {
    async fn record_view(&self, event: &ViewEvent) {
        self.events.lock().await.push(event.clone());
    }
}
