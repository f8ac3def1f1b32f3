// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API request handlers.

mod groups;
mod health;
mod links;
mod scheduler;

pub use groups::*;
pub use health::*;
pub use links::*;
pub use scheduler::*;
