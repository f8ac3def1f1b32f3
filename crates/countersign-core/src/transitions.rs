// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recipient state machine.
//!
//! Every status change of a ledger entry goes through [`transition`]. The
//! table decides whether an action is permitted from a status for a given
//! actor, and what status the entry lands in. Envelope partial signing and
//! sequential activation are layered on top by the engine.

use crate::error::CoreError;
use crate::model::RecipientStatus;

/// A recipient-facing or system action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Open the request.
    View,
    /// Sign one or more documents.
    Sign,
    /// Refuse to sign.
    Decline,
    /// Forward the slot to another identity.
    Delegate,
    /// Owner replaces the slot's identity.
    Reassign,
    /// Scheduler marks the entry as past due.
    Expire,
}

impl ActionKind {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Sign => "sign",
            Self::Decline => "decline",
            Self::Delegate => "delegate",
            Self::Reassign => "reassign",
            Self::Expire => "expire",
        }
    }
}

/// Who is performing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// The current holder of the recipient link.
    Recipient,
    /// The identity the slot was delegated to.
    Delegate,
    /// The group owner.
    Owner,
    /// The reminder/expiration scheduler.
    Scheduler,
}

impl Actor {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Recipient => "recipient",
            Self::Delegate => "delegate",
            Self::Owner => "owner",
            Self::Scheduler => "scheduler",
        }
    }
}

/// Result of a permitted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status before the action.
    pub from: RecipientStatus,
    /// Status after the action.
    pub to: RecipientStatus,
}

impl Transition {
    /// False for idempotent no-ops and annotation-only actions.
    pub fn changes_status(&self) -> bool {
        self.from != self.to
    }
}

/// Apply the transition table.
///
/// Returns `AccessDenied` when the actor may never perform the action, and
/// `StateConflict` when the action is not valid from `from`.
pub fn transition(
    from: RecipientStatus,
    action: ActionKind,
    actor: Actor,
) -> Result<Transition, CoreError> {
    use ActionKind as A;
    use Actor as R;
    use RecipientStatus as S;

    let permitted_actor = match action {
        A::View | A::Sign | A::Decline => matches!(actor, R::Recipient | R::Delegate),
        A::Delegate => actor == R::Recipient,
        A::Reassign => actor == R::Owner,
        A::Expire => actor == R::Scheduler,
    };
    if !permitted_actor {
        return Err(CoreError::access_denied(format!(
            "{} may not perform '{}'",
            actor.as_str(),
            action.as_str()
        )));
    }

    let to = match (action, actor, from) {
        (A::View, R::Recipient, S::Pending | S::Viewed) => Some(S::Viewed),
        // The forwarding recipient keeps view-only access.
        (A::View, R::Recipient | R::Delegate, S::Delegated) => Some(S::Delegated),

        (A::Sign, R::Recipient, S::Pending | S::Viewed) => Some(S::Signed),
        (A::Sign, R::Delegate, S::Delegated) => Some(S::Signed),

        (A::Decline, R::Recipient, S::Pending | S::Viewed | S::AwaitingTurn) => {
            Some(S::Declined)
        }
        (A::Decline, R::Delegate, S::Delegated) => Some(S::Declined),

        (A::Delegate, R::Recipient, S::Pending | S::Viewed) => Some(S::Delegated),

        (A::Reassign, R::Owner, S::Pending | S::Viewed | S::Delegated) => Some(S::Pending),
        (A::Reassign, R::Owner, S::AwaitingTurn) => Some(S::AwaitingTurn),

        (A::Expire, R::Scheduler, s) if !s.is_terminal() => Some(s),

        _ => None,
    };

    match to {
        Some(to) => Ok(Transition { from, to }),
        None => Err(CoreError::conflict(
            actor.as_str(),
            from.as_str(),
            conflict_message(action, from),
        )),
    }
}

fn conflict_message(action: ActionKind, from: RecipientStatus) -> String {
    match from {
        RecipientStatus::AwaitingTurn => {
            format!("cannot {} before an earlier recipient signs", action.as_str())
        }
        RecipientStatus::Delegated => {
            format!("entry is delegated; only the delegate may {}", action.as_str())
        }
        s if s.is_terminal() => format!("entry is already {}", s.as_str()),
        s => format!("'{}' is not permitted from '{}'", action.as_str(), s.as_str()),
    }
}
