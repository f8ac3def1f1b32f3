// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded schema for the signing ledger.
//!
//! Both backends carry the same four tables:
//!
//! - `signing_groups`: one row per request group with its documents, order,
//!   view mode, status, expiration policy, artifact references and the
//!   finalization claim and backoff columns.
//! - `recipient_entries`: one row per recipient slot keyed by `entry_id`, with
//!   the current link, status, signed documents and payload, access policy,
//!   verification code state, delegation, the reassignment history as JSON and
//!   `issued_at`, the moment the current holder was asked to act.
//! - `retired_links`: links given up by reassignment, each mapped to its slot
//!   so the former holder's link keeps resolving.
//! - `notification_marks`: insert-once `(subject_id, mark)` rows that make
//!   reminders, warnings and finalization notices go out at most once.
//!
//! Call [`run_sqlite`] or [`run_postgres`] before constructing a persistence
//! implementation.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use countersign_core::migrations;
//!
//! let pool = SqlitePool::connect("sqlite://countersign.db?mode=rwc").await?;
//! migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with the ledger schema embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with the ledger schema embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations. Already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Run SQLite migrations. Already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
