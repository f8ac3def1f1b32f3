// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for countersign-core.
//!
//! [`SigningRuntime`] wires the engine, finalizer and scheduler to one set of
//! collaborators so they can be embedded in an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use countersign_core::runtime::SigningRuntime;
//! use countersign_core::persistence::SqlitePersistence;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path(".data/countersign.db").await?);
//!
//!     let runtime = SigningRuntime::builder()
//!         .persistence(persistence)
//!         .build()?;
//!
//!     let report = runtime.scheduler().sweep().await?;
//!     println!("{} reminders sent", report.reminders_sent);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::collaborators::{
    ArtifactAssembler, BlobStore, LogNotifier, ManifestAssembler, MemoryBlobStore, NoopTelemetry,
    Notifier, ViewTelemetry,
};
use crate::config::EngineConfig;
use crate::engine::SigningEngine;
use crate::finalizer::Finalizer;
use crate::notifications::NotificationDispatcher;
use crate::persistence::Persistence;
use crate::scheduler::ReminderScheduler;

/// Builder for creating a [`SigningRuntime`].
#[derive(Default)]
pub struct SigningRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    notifier: Option<Arc<dyn Notifier>>,
    assembler: Option<Arc<dyn ArtifactAssembler>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    telemetry: Option<Arc<dyn ViewTelemetry>>,
    config: EngineConfig,
}

impl std::fmt::Debug for SigningRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRuntimeBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("notifier", &self.notifier.as_ref().map(|_| "..."))
            .field("assembler", &self.assembler.as_ref().map(|_| "..."))
            .field("blob_store", &self.blob_store.as_ref().map(|_| "..."))
            .field("telemetry", &self.telemetry.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl SigningRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the notification transport.
    ///
    /// Default: [`LogNotifier`]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the artifact assembler.
    ///
    /// Default: [`ManifestAssembler`] over the configured blob store.
    pub fn assembler(mut self, assembler: Arc<dyn ArtifactAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Set the blob store used by the default assembler.
    ///
    /// Default: [`MemoryBlobStore`]
    pub fn blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    /// Set the view telemetry sink.
    ///
    /// Default: [`NoopTelemetry`]
    pub fn telemetry(mut self, telemetry: Arc<dyn ViewTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set the engine configuration.
    ///
    /// Default: [`EngineConfig::default`]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SigningRuntime> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let blob_store: Arc<dyn BlobStore> = self
            .blob_store
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));
        let assembler = self
            .assembler
            .unwrap_or_else(|| Arc::new(ManifestAssembler::new(blob_store.clone())));
        let telemetry = self.telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry));

        let dispatcher = NotificationDispatcher::new(notifier);
        let finalizer = Arc::new(Finalizer::new(
            persistence.clone(),
            assembler,
            dispatcher.clone(),
            self.config.clone(),
        ));
        let engine = Arc::new(SigningEngine::new(
            persistence.clone(),
            dispatcher.clone(),
            finalizer.clone(),
            telemetry,
            self.config.clone(),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            persistence.clone(),
            dispatcher,
            finalizer.clone(),
            self.config,
        ));

        info!("SigningRuntime built");
        Ok(SigningRuntime {
            persistence,
            blob_store,
            engine,
            finalizer,
            scheduler,
        })
    }
}

/// The signing engine, finalizer and scheduler sharing one set of collaborators.
pub struct SigningRuntime {
    persistence: Arc<dyn Persistence>,
    blob_store: Arc<dyn BlobStore>,
    engine: Arc<SigningEngine>,
    finalizer: Arc<Finalizer>,
    scheduler: Arc<ReminderScheduler>,
}

impl std::fmt::Debug for SigningRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRuntime")
            .field("persistence", &"...")
            .field("blob_store", &"...")
            .field("engine", &self.engine)
            .finish()
    }
}

impl SigningRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SigningRuntimeBuilder {
        SigningRuntimeBuilder::new()
    }

    /// Get the transition engine.
    pub fn engine(&self) -> &Arc<SigningEngine> {
        &self.engine
    }

    /// Get the finalizer.
    pub fn finalizer(&self) -> &Arc<Finalizer> {
        &self.finalizer
    }

    /// Get the reminder/expiration scheduler.
    pub fn scheduler(&self) -> &Arc<ReminderScheduler> {
        &self.scheduler
    }

    /// Get a reference to the persistence layer.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Get the blob store source documents and artifacts live in.
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob_store
    }
}
