// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notifier that writes every message to the tracing log.

use async_trait::async_trait;
use tracing::info;

use super::{Notification, Notifier, NotifyError};

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = notification.kind.as_str(),
            to = %notification.to,
            group_id = %notification.group_id,
            link_id = ?notification.link_id,
            data = %notification.data,
            "Notification"
        );
        Ok(())
    }
}
