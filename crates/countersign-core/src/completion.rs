// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Group aggregate status derived from ledger entries.

use crate::model::{GroupStatus, RecipientStatus};

/// Recompute the group aggregate from entry statuses.
///
/// `declined` wins over everything; `completed` requires every entry to be
/// `signed`; a fully terminal group with cancelled entries (owner cancel) is
/// `cancelled`. Anything else is still `pending_signature`.
pub fn aggregate_status(statuses: &[RecipientStatus]) -> GroupStatus {
    if statuses.contains(&RecipientStatus::Declined) {
        return GroupStatus::Declined;
    }
    if !statuses.is_empty() && statuses.iter().all(|s| *s == RecipientStatus::Signed) {
        return GroupStatus::Completed;
    }
    if !statuses.is_empty()
        && statuses.iter().all(|s| s.is_terminal())
        && statuses.contains(&RecipientStatus::Cancelled)
    {
        return GroupStatus::Cancelled;
    }
    GroupStatus::PendingSignature
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecipientStatus as S;

    #[test]
    fn test_aggregate_status() {
        let cases = [
            (vec![S::Signed, S::Signed], GroupStatus::Completed),
            (vec![S::Signed, S::Pending], GroupStatus::PendingSignature),
            (vec![S::Signed, S::Declined, S::Cancelled], GroupStatus::Declined),
            (vec![S::Signed, S::Cancelled], GroupStatus::Cancelled),
            (vec![S::Delegated, S::AwaitingTurn], GroupStatus::PendingSignature),
            (vec![], GroupStatus::PendingSignature),
        ];
        for (statuses, expected) in cases {
            assert_eq!(aggregate_status(&statuses), expected, "{:?}", statuses);
        }
    }
}
