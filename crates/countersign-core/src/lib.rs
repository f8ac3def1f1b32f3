// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Countersign Core - Multi-party Signature Workflow Engine
//!
//! This crate coordinates the collection of signatures from one or more
//! recipients across one or more documents. It keeps a ledger entry per
//! recipient, enforces the signing order, cascades declines, and finalizes a
//! completed group exactly once, persisting all state to SQLite or
//! PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 countersign-server (HTTP, cron)                  │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ recipient links / owner calls          │ sweep trigger
//!          ▼                                        ▼
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │     SigningEngine        │          │   ReminderScheduler      │
//! │  transitions + ordering  │          │  reminders, expiration   │
//! └──────────────────────────┘          └──────────────────────────┘
//!          │ sign / decline                         │ retry
//!          ▼                                        ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │            Finalizer (completion claim, artifact)                │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                    │                         │
//!          ▼                    ▼                         ▼
//! ┌────────────────┐  ┌───────────────────┐  ┌──────────────────────┐
//! │  Persistence   │  │ ArtifactAssembler │  │      Notifier        │
//! │ SQLite / PgSQL │  │   + BlobStore     │  │  (fire-and-forget)   │
//! └────────────────┘  └───────────────────┘  └──────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_group` | Create a group and one ledger entry per recipient |
//! | `get_status` | What a recipient link sees (view-only after reassignment) |
//! | `submit_action` | `view`, `sign`, `decline`, `delegate` through a recipient link |
//! | `request_verification` | Send a one-time code for secondary verification |
//! | `get_group_summary` | The owner's view, including the artifact reference |
//! | `reassign` / `cancel_group` / `delete_group` | Owner operations |
//! | `sweep` | Reminders, due warnings, expiration, finalization retry |
//!
//! # Recipient Status State Machine
//!
//! ```text
//!                 sequential, index > 0
//!   ┌─────────┐ ───────────────────────► ┌───────────────┐
//!   │ create  │                          │ AWAITING_TURN │
//!   └────┬────┘                          └───────┬───────┘
//!        │                                       │ predecessor signed
//!        ▼                                       ▼
//!   ┌─────────┐  view   ┌────────┐        ┌─────────┐
//!   │ PENDING │ ──────► │ VIEWED │        │ PENDING │
//!   └────┬────┘         └───┬────┘        └─────────┘
//!        │  sign / decline / delegate         │
//!        ▼                                    ▼
//!   ┌────────┐  ┌──────────┐  ┌───────────┐  ┌───────────┐
//!   │ SIGNED │  │ DECLINED │  │ DELEGATED │  │ CANCELLED │
//!   └────────┘  └──────────┘  └───────────┘  └───────────┘
//! ```
//!
//! A decline cancels every other unsigned entry in the same transaction.
//! A delegated entry is signed or declined through the delegate's link.
//!
//! # Modules
//!
//! - [`model`]: ledger entry and request group types
//! - [`transitions`]: the single transition table
//! - [`ordering`]: signing order policy
//! - [`engine`]: the core-exposed operations
//! - [`finalizer`]: completion claim and artifact assembly
//! - [`scheduler`]: reminder and expiration sweep
//! - [`persistence`]: SQLite and PostgreSQL backends

/// Link resolution, access codes and one-time verification.
pub mod access;

/// Collaborator traits (blob store, assembler, notifier, telemetry) and defaults.
pub mod collaborators;

/// Group aggregate status derived from ledger entries.
pub mod completion;

/// Engine tunables loaded from environment variables.
pub mod config;

/// The core-exposed operations.
pub mod engine;

/// Multi-document envelope coordination.
pub mod envelope;

/// Error types with stable machine codes.
pub mod error;

/// Completion claim and exactly-once artifact assembly.
pub mod finalizer;

/// Embedded database migrations.
pub mod migrations;

/// Ledger entry and request group data model.
pub mod model;

/// Notification dispatch and message builders.
pub mod notifications;

/// Signing order policy.
pub mod ordering;

/// Persistence trait and SQLite/PostgreSQL backends.
pub mod persistence;

/// Recipient and owner views.
pub mod projection;

/// Embeddable runtime wiring.
pub mod runtime;

/// Reminder and expiration sweep.
pub mod scheduler;

/// Recipient status transition table.
pub mod transitions;

pub use engine::{
    ActionOutcome, CreateGroupRequest, CreatedGroup, RecipientAction, RecipientInput,
    RecipientLink, SigningEngine,
};
pub use error::{CoreError, Result};
pub use runtime::{SigningRuntime, SigningRuntimeBuilder};
