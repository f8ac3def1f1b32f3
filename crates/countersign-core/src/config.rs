// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine tunables loaded from environment variables.

use std::time::Duration;

/// Tunables of the signing engine, scheduler and finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum length of a decline reason after trimming.
    pub min_decline_reason_len: usize,
    /// Days after creation at which reminders go out.
    pub reminder_after_days: Vec<u32>,
    /// Days before the due date at which warnings go out.
    pub due_warning_days: Vec<u32>,
    /// How long an issued verification code stays valid.
    pub verification_code_ttl: Duration,
    /// How long a finalization claim is held before another worker may retry.
    pub finalize_lease: Duration,
    /// Base delay between finalization retries; doubled per failed attempt.
    pub finalize_retry_backoff: Duration,
    /// Groups read per page while sweeping.
    pub sweep_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_decline_reason_len: 5,
            reminder_after_days: vec![3, 7],
            due_warning_days: vec![7, 1],
            verification_code_ttl: Duration::from_secs(600), // 10 minutes
            finalize_lease: Duration::from_secs(300),        // 5 minutes
            finalize_retry_backoff: Duration::from_secs(60),
            sweep_batch_size: 100,
        }
    }
}

/// Upper bound of the finalization retry delay.
pub const MAX_FINALIZE_BACKOFF: Duration = Duration::from_secs(3600);

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    ///
    /// Environment variables:
    /// - `COUNTERSIGN_MIN_DECLINE_REASON_LEN` (default: 5)
    /// - `COUNTERSIGN_REMINDER_AFTER_DAYS`: comma separated (default: 3,7)
    /// - `COUNTERSIGN_DUE_WARNING_DAYS`: comma separated (default: 7,1)
    /// - `COUNTERSIGN_VERIFICATION_CODE_TTL_SECS` (default: 600)
    /// - `COUNTERSIGN_FINALIZE_LEASE_SECS` (default: 300)
    /// - `COUNTERSIGN_FINALIZE_RETRY_BACKOFF_SECS` (default: 60)
    /// - `COUNTERSIGN_SWEEP_BATCH_SIZE` (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_decline_reason_len = std::env::var("COUNTERSIGN_MIN_DECLINE_REASON_LEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_decline_reason_len);

        let reminder_after_days = std::env::var("COUNTERSIGN_REMINDER_AFTER_DAYS")
            .ok()
            .and_then(|v| parse_day_list(&v))
            .unwrap_or(defaults.reminder_after_days);

        let due_warning_days = std::env::var("COUNTERSIGN_DUE_WARNING_DAYS")
            .ok()
            .and_then(|v| parse_day_list(&v))
            .unwrap_or(defaults.due_warning_days);

        let verification_code_ttl = secs_var("COUNTERSIGN_VERIFICATION_CODE_TTL_SECS")
            .unwrap_or(defaults.verification_code_ttl);
        let finalize_lease =
            secs_var("COUNTERSIGN_FINALIZE_LEASE_SECS").unwrap_or(defaults.finalize_lease);
        let finalize_retry_backoff = secs_var("COUNTERSIGN_FINALIZE_RETRY_BACKOFF_SECS")
            .unwrap_or(defaults.finalize_retry_backoff);

        let sweep_batch_size = std::env::var("COUNTERSIGN_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &i64| *n > 0)
            .unwrap_or(defaults.sweep_batch_size);

        Self {
            min_decline_reason_len,
            reminder_after_days,
            due_warning_days,
            verification_code_ttl,
            finalize_lease,
            finalize_retry_backoff,
            sweep_batch_size,
        }
    }

    /// Delay before the next finalization attempt after `attempts` failures.
    pub fn finalize_backoff(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(16);
        self.finalize_retry_backoff
            .saturating_mul(1u32 << shift)
            .min(MAX_FINALIZE_BACKOFF)
    }
}

fn secs_var(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_day_list(value: &str) -> Option<Vec<u32>> {
    let days: Result<Vec<u32>, _> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect();
    days.ok().filter(|d| !d.is_empty())
}
