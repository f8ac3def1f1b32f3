// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.

pub mod handlers;
pub mod router;

pub use router::create_router;
