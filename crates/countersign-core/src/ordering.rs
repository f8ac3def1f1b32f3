// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signing order policy.
//!
//! Pure functions over recipient statuses. The persistence layer applies the
//! activation they compute with a compare-and-swap on `awaiting_turn`, so a
//! stale read can never activate a recipient twice.

use crate::model::{RecipientStatus, SigningOrder};

/// Statuses assigned to `count` recipients when a group is created.
pub fn initial_statuses(order: SigningOrder, count: usize) -> Vec<RecipientStatus> {
    (0..count)
        .map(|index| match order {
            SigningOrder::Any => RecipientStatus::Pending,
            SigningOrder::Sequential if index == 0 => RecipientStatus::Pending,
            SigningOrder::Sequential => RecipientStatus::AwaitingTurn,
        })
        .collect()
}

/// Recipient to activate after the entry at `signed_index` became fully signed.
///
/// `statuses` are ordered by recipient index, as observed before the signature
/// was written. Returns `None` in `any` mode and when the successor is not
/// waiting for its turn.
pub fn next_activation(
    order: SigningOrder,
    statuses: &[RecipientStatus],
    signed_index: u32,
) -> Option<u32> {
    if order != SigningOrder::Sequential {
        return None;
    }
    let next = signed_index.checked_add(1)?;
    match statuses.get(next as usize) {
        Some(RecipientStatus::AwaitingTurn) => Some(next),
        _ => None,
    }
}

/// Whether the sequential invariant holds: at most one actionable entry, and
/// every entry before it is signed.
pub fn sequential_invariant_holds(statuses: &[RecipientStatus]) -> bool {
    let actionable: Vec<usize> = statuses
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_actionable())
        .map(|(i, _)| i)
        .collect();
    match actionable.as_slice() {
        [] => true,
        [only] => statuses[..*only]
            .iter()
            .all(|s| *s == RecipientStatus::Signed),
        _ => false,
    }
}

/// Recipient indexes currently expected to act.
pub fn active_indices(statuses: &[RecipientStatus]) -> Vec<u32> {
    statuses
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_actionable())
        .map(|(i, _)| i as u32)
        .collect()
}
