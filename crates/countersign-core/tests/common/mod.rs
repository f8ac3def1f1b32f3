// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for countersign-core workflow tests.
//!
//! Provides TestContext, which wires a SigningRuntime to an in-memory SQLite
//! database and recording collaborators.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;

use countersign_core::access::LinkCredentials;
use countersign_core::collaborators::{RecordingAssembler, RecordingNotifier, RecordingTelemetry};
use countersign_core::config::EngineConfig;
use countersign_core::model::{
    DocumentRef, FieldKind, FieldPlacement, Identity, Owner, SignedPayload, SigningOrder, ViewMode,
};
use countersign_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use countersign_core::projection::GroupSummary;
use countersign_core::{
    CreateGroupRequest, CreatedGroup, RecipientAction, RecipientInput, SigningEngine,
    SigningRuntime,
};

pub const OWNER_ID: &str = "owner-1";

/// Test context holding a runtime and the collaborators it records into.
pub struct TestContext {
    pub runtime: SigningRuntime,
    pub notifier: RecordingNotifier,
    pub assembler: RecordingAssembler,
    pub telemetry: RecordingTelemetry,
    /// The SQLite pool behind `runtime`, when SQLite backs it.
    pub sqlite: Option<sqlx::SqlitePool>,
}

impl TestContext {
    /// Context over a fresh in-memory SQLite database.
    pub async fn new() -> Self {
        Self::with(RecordingAssembler::new(), EngineConfig::default()).await
    }

    /// Context with a specific assembler and configuration.
    pub async fn with(assembler: RecordingAssembler, config: EngineConfig) -> Self {
        // 1. One connection that never recycles, so the database outlives idle periods
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        // 2. Schema
        countersign_core::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let mut ctx = Self::build(
            Arc::new(SqlitePersistence::new(pool.clone())),
            assembler,
            config,
        );
        ctx.sqlite = Some(pool);
        ctx
    }

    /// Context over the PostgreSQL database in TEST_DATABASE_URL.
    pub async fn postgres() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = sqlx::PgPool::connect(&database_url).await.ok()?;
        countersign_core::migrations::run_postgres(&pool).await.ok()?;
        Some(Self::build(
            Arc::new(PostgresPersistence::new(pool)),
            RecordingAssembler::new(),
            EngineConfig::default(),
        ))
    }

    fn build(
        persistence: Arc<dyn Persistence>,
        assembler: RecordingAssembler,
        config: EngineConfig,
    ) -> Self {
        let notifier = RecordingNotifier::new();
        let telemetry = RecordingTelemetry::new();
        let runtime = SigningRuntime::builder()
            .persistence(persistence)
            .notifier(Arc::new(notifier.clone()))
            .assembler(Arc::new(assembler.clone()))
            .telemetry(Arc::new(telemetry.clone()))
            .config(config)
            .build()
            .expect("Failed to build runtime");
        Self {
            runtime,
            notifier,
            assembler,
            telemetry,
            sqlite: None,
        }
    }

    pub fn engine(&self) -> &SigningEngine {
        self.runtime.engine()
    }

    /// Create a group owned by [`owner`] at `now`.
    pub async fn create(&self, request: CreateGroupRequest, now: DateTime<Utc>) -> CreatedGroup {
        self.engine()
            .create_group_at(owner(), request, now)
            .await
            .expect("Failed to create group")
    }

    /// The owner's summary of a group.
    pub async fn summary(&self, group_id: &str) -> GroupSummary {
        self.engine()
            .get_group_summary(OWNER_ID, group_id)
            .await
            .expect("Failed to load group summary")
    }
}

// ============================================================================
// Request builders
// ============================================================================

pub fn owner() -> Owner {
    Owner {
        id: OWNER_ID.to_string(),
        name: "Olga Owner".to_string(),
        email: "olga@example.com".to_string(),
    }
}

pub fn document(document_id: &str, page_count: u32) -> DocumentRef {
    DocumentRef {
        document_id: document_id.to_string(),
        blob_ref: format!("mem:{}", document_id),
        display_name: format!("{}.pdf", document_id),
        page_count,
    }
}

pub fn signature_field(field_id: &str, document_id: &str, recipient_index: u32) -> FieldPlacement {
    FieldPlacement {
        field_id: field_id.to_string(),
        document_id: document_id.to_string(),
        recipient_index,
        kind: FieldKind::Signature,
        page: 1,
        x: 0.1,
        y: 0.8,
        width: 0.3,
        height: 0.05,
        required: true,
        label: None,
    }
}

pub fn recipient(name: &str, email: &str) -> RecipientInput {
    RecipientInput {
        identity: Identity::signer(name, email),
        access_code: None,
        require_verification: false,
        due_at: None,
    }
}

/// Ann, Bob and Cat, in that order.
pub fn three_recipients() -> Vec<RecipientInput> {
    vec![
        recipient("Ann", "ann@example.com"),
        recipient("Bob", "bob@example.com"),
        recipient("Cat", "cat@example.com"),
    ]
}

pub fn request(
    recipients: Vec<RecipientInput>,
    documents: Vec<DocumentRef>,
    fields: Vec<FieldPlacement>,
    signing_order: SigningOrder,
) -> CreateGroupRequest {
    CreateGroupRequest {
        title: "Lease agreement".to_string(),
        documents,
        recipients,
        fields,
        signing_order,
        view_mode: ViewMode::Isolated,
        due_at: None,
        hard_cutoff: false,
    }
}

/// One document, no fields.
pub fn simple_request(
    recipients: Vec<RecipientInput>,
    signing_order: SigningOrder,
) -> CreateGroupRequest {
    request(recipients, vec![document("doc-1", 2)], vec![], signing_order)
}

// ============================================================================
// Action helpers
// ============================================================================

pub fn no_credentials() -> LinkCredentials {
    LinkCredentials::default()
}

pub fn values(pairs: &[(&str, &str)]) -> SignedPayload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// Sign every unsigned document with the given values.
pub fn sign(values: SignedPayload) -> RecipientAction {
    RecipientAction::Sign {
        documents: None,
        values,
    }
}

pub fn sign_documents(documents: &[&str], values: SignedPayload) -> RecipientAction {
    RecipientAction::Sign {
        documents: Some(documents.iter().map(|d| d.to_string()).collect()),
        values,
    }
}

pub fn decline(reason: &str) -> RecipientAction {
    RecipientAction::Decline {
        reason: reason.to_string(),
    }
}

pub fn view() -> RecipientAction {
    RecipientAction::View {
        context: Default::default(),
    }
}

/// Link of the recipient at `index`.
pub fn link(created: &CreatedGroup, index: usize) -> String {
    created.recipients[index].link_id.clone()
}

// ============================================================================
// Macros
// ============================================================================

#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
