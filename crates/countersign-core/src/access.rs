// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Link resolution and per-recipient access checks.
//!
//! A ledger entry can be reached through up to three links: the current
//! recipient's, the delegate's and, after a reassignment, the original
//! recipient's. Secrets (access codes and one-time verification codes) are
//! stored as HMAC-SHA256 digests keyed by the entry id.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::CoreError;
use crate::model::LedgerEntry;
use crate::transitions::Actor;

type HmacSha256 = Hmac<Sha256>;

/// Which link of an entry was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// The current holder's link.
    Recipient,
    /// The delegate's link.
    Delegate,
    /// A reassigned-away recipient's link, kept for read-only viewing.
    Original,
}

impl LinkRole {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recipient => "recipient",
            Self::Delegate => "delegate",
            Self::Original => "original",
        }
    }

    /// Actor for state transitions; the original link is view-only.
    pub fn actor(&self) -> Result<Actor, CoreError> {
        match self {
            Self::Recipient => Ok(Actor::Recipient),
            Self::Delegate => Ok(Actor::Delegate),
            Self::Original => Err(CoreError::access_denied(
                "this link was reassigned and is view-only",
            )),
        }
    }
}

/// Secrets presented alongside a link.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkCredentials {
    /// The recipient's access code.
    #[serde(default)]
    pub access_code: Option<String>,
    /// A one-time verification code from `request_verification`.
    #[serde(default)]
    pub verification_code: Option<String>,
}

/// Determine which of an entry's links `link_id` is.
pub fn resolve_link(entry: &LedgerEntry, link_id: &str) -> Result<LinkRole, CoreError> {
    if entry.link_id == link_id {
        return Ok(LinkRole::Recipient);
    }
    if entry
        .delegation
        .as_ref()
        .is_some_and(|d| d.link_id == link_id)
    {
        return Ok(LinkRole::Delegate);
    }
    match entry.reassignment_for(link_id) {
        Some(r) if r.allow_original_view => Ok(LinkRole::Original),
        Some(_) => Err(CoreError::access_denied(
            "this recipient was reassigned by the owner",
        )),
        None => Err(CoreError::not_found("recipient link", link_id)),
    }
}

/// Digest a secret for storage.
pub fn hash_secret(entry_id: &str, secret: &str) -> Result<String, CoreError> {
    Ok(STANDARD.encode(mac_for(entry_id, secret)?.finalize().into_bytes()))
}

/// Compare a secret against a stored digest in constant time.
pub fn verify_secret(entry_id: &str, secret: &str, stored: &str) -> bool {
    let Ok(expected) = STANDARD.decode(stored) else {
        return false;
    };
    mac_for(entry_id, secret).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
}

fn mac_for(entry_id: &str, secret: &str) -> Result<HmacSha256, CoreError> {
    let mut mac = HmacSha256::new_from_slice(entry_id.as_bytes())
        .map_err(|e| CoreError::validation("entry_id", format!("invalid HMAC key: {}", e)))?;
    mac.update(secret.trim().as_bytes());
    Ok(mac)
}

/// Require the access code when the entry has one.
pub fn check_access_code(entry: &LedgerEntry, supplied: Option<&str>) -> Result<(), CoreError> {
    let Some(stored) = entry.access_policy.access_code_hash.as_deref() else {
        return Ok(());
    };
    match supplied {
        None => Err(CoreError::access_denied("access code required")),
        Some(code) if verify_secret(&entry.entry_id, code, stored) => Ok(()),
        Some(_) => Err(CoreError::access_denied("invalid access code")),
    }
}

/// Require a valid, unexpired verification code when the entry demands one.
pub fn check_verification(
    entry: &LedgerEntry,
    supplied: Option<&str>,
    now_ms: i64,
) -> Result<(), CoreError> {
    if !entry.access_policy.require_verification {
        return Ok(());
    }
    let Some(code) = supplied else {
        return Err(CoreError::access_denied("verification code required"));
    };
    let (Some(stored), Some(expires_at_ms)) = (
        entry.verification.code_hash.as_deref(),
        entry.verification.expires_at_ms,
    ) else {
        return Err(CoreError::access_denied(
            "no verification code has been issued",
        ));
    };
    if now_ms >= expires_at_ms {
        return Err(CoreError::access_denied("verification code expired"));
    }
    if !verify_secret(&entry.entry_id, code, stored) {
        return Err(CoreError::access_denied("invalid verification code"));
    }
    Ok(())
}

/// A fresh six-digit verification code.
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}
