// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-document envelope coordination.
//!
//! A group with several documents is an envelope. A recipient may sign the
//! documents one at a time; the entry only becomes `signed` once every
//! document of the group is covered. Documents on which the recipient owns no
//! fields are covered implicitly by their first signature.
//!
//! A single-document group is treated as an envelope of one, so the same
//! planning applies to both.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::collaborators::SignerRecord;
use crate::error::CoreError;
use crate::model::{FieldKind, FieldPlacement, LedgerEntry, RequestGroup, SignedPayload};

/// What a `sign` action will write.
#[derive(Debug, Clone, PartialEq)]
pub struct SignaturePlan {
    /// Documents covered by this action.
    pub newly_signed: BTreeSet<String>,
    /// Full signed-document set after the action.
    pub signed_documents: BTreeSet<String>,
    /// Merged payload after the action.
    pub payload: SignedPayload,
    /// Whether every document of the group is now signed.
    pub fully_signed: bool,
}

/// Validate a `sign` action and compute its effect.
///
/// `requested` selects documents explicitly; `None` means every document the
/// recipient has not signed yet.
pub fn plan_signature(
    group: &RequestGroup,
    entry: &LedgerEntry,
    requested: Option<&[String]>,
    values: &SignedPayload,
) -> Result<SignaturePlan, CoreError> {
    let targets: BTreeSet<String> = match requested {
        Some([]) => {
            return Err(CoreError::validation(
                "documents",
                "at least one document must be selected",
            ));
        }
        Some(ids) => {
            let mut targets = BTreeSet::new();
            for id in ids {
                if group.document(id).is_none() {
                    return Err(CoreError::validation(
                        "documents",
                        format!("unknown document '{}'", id),
                    ));
                }
                if entry.signed_documents.contains(id) {
                    return Err(CoreError::conflict(
                        &entry.entry_id,
                        entry.status.as_str(),
                        format!("document '{}' is already signed", id),
                    ));
                }
                targets.insert(id.clone());
            }
            targets
        }
        None => group
            .documents
            .iter()
            .map(|d| d.document_id.clone())
            .filter(|id| !entry.signed_documents.contains(id))
            .collect(),
    };

    if targets.is_empty() {
        return Err(CoreError::conflict(
            &entry.entry_id,
            entry.status.as_str(),
            "every document is already signed",
        ));
    }

    for (field_id, value) in values {
        let field = entry
            .assigned_fields
            .iter()
            .find(|f| &f.field_id == field_id)
            .ok_or_else(|| {
                CoreError::validation(
                    "values",
                    format!("field '{}' is not assigned to this recipient", field_id),
                )
            })?;
        if !targets.contains(&field.document_id) {
            return Err(CoreError::validation(
                "values",
                format!(
                    "field '{}' belongs to document '{}', which is not being signed",
                    field_id, field.document_id
                ),
            ));
        }
        check_value(field, value)?;
    }

    for field in entry
        .assigned_fields
        .iter()
        .filter(|f| f.required && targets.contains(&f.document_id))
    {
        if values.get(&field.field_id).is_none_or(is_blank) {
            return Err(CoreError::validation(
                "values",
                format!("missing value for required field '{}'", field.field_id),
            ));
        }
    }

    // Documents without any field of this recipient ride along.
    let mut newly_signed = targets;
    for document in &group.documents {
        let id = &document.document_id;
        if !entry.signed_documents.contains(id) && entry.fields_on(id).next().is_none() {
            newly_signed.insert(id.clone());
        }
    }

    let signed_documents: BTreeSet<String> = entry
        .signed_documents
        .union(&newly_signed)
        .cloned()
        .collect();
    let fully_signed = group
        .documents
        .iter()
        .all(|d| signed_documents.contains(&d.document_id));

    let mut payload = entry.signed_payload.clone().unwrap_or_default();
    payload.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(SignaturePlan {
        newly_signed,
        signed_documents,
        payload,
        fully_signed,
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_value(field: &FieldPlacement, value: &Value) -> Result<(), CoreError> {
    let ok = match (field.kind, value) {
        (_, Value::Null) => !field.required,
        (FieldKind::Checkbox, Value::Bool(checked)) => *checked || !field.required,
        (FieldKind::Checkbox, _) => false,
        (FieldKind::Date, Value::String(s)) => {
            chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok()
        }
        (_, Value::String(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CoreError::validation(
            "values",
            format!("invalid value for {:?} field '{}'", field.kind, field.field_id),
        ))
    }
}

/// Values an entry supplied for fields on one document.
pub fn values_for_document(entry: &LedgerEntry, document_id: &str) -> SignedPayload {
    let Some(payload) = entry.signed_payload.as_ref() else {
        return SignedPayload::new();
    };
    entry
        .fields_on(document_id)
        .filter_map(|f| {
            payload
                .get(&f.field_id)
                .map(|v| (f.field_id.clone(), v.clone()))
        })
        .collect()
}

/// Signer records for one document, in recipient order.
pub fn signer_records(entries: &[LedgerEntry], document_id: Option<&str>) -> Vec<SignerRecord> {
    entries
        .iter()
        .map(|entry| {
            let (identity, on_behalf_of) = match &entry.delegation {
                Some(d) => (d.delegate.clone(), Some(entry.identity.clone())),
                None => (entry.identity.clone(), None),
            };
            SignerRecord {
                recipient_index: entry.recipient_index,
                identity,
                on_behalf_of,
                signed_at: entry.timestamps.signed_at,
                values: document_id
                    .map(|id| values_for_document(entry, id))
                    .unwrap_or_default(),
            }
        })
        .collect()
}

/// Signing progress of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentProgress {
    pub document_id: String,
    pub display_name: String,
    /// Recipient indexes that have signed this document.
    pub signed_by: Vec<u32>,
    /// Recipient indexes still expected to sign it.
    pub outstanding: Vec<u32>,
}

/// Per-document progress across all entries.
pub fn document_progress(group: &RequestGroup, entries: &[LedgerEntry]) -> Vec<DocumentProgress> {
    group
        .documents
        .iter()
        .map(|d| {
            let (signed, outstanding): (Vec<&LedgerEntry>, Vec<&LedgerEntry>) = entries
                .iter()
                .partition(|e| e.signed_documents.contains(&d.document_id));
            DocumentProgress {
                document_id: d.document_id.clone(),
                display_name: d.display_name.clone(),
                signed_by: signed.iter().map(|e| e.recipient_index).collect(),
                outstanding: outstanding
                    .iter()
                    .filter(|e| !e.status.is_terminal())
                    .map(|e| e.recipient_index)
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccessPolicy, DocumentRef, ExpirationPolicy, FinalizationState, GroupStatus, Identity,
        LedgerTimestamps, Owner, RecipientStatus, SigningOrder, VerificationState, ViewMode,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn doc(id: &str) -> DocumentRef {
        DocumentRef {
            document_id: id.to_string(),
            blob_ref: format!("mem:{}", id),
            display_name: format!("{}.pdf", id),
            page_count: 1,
        }
    }

    fn field(id: &str, document_id: &str, kind: FieldKind, required: bool) -> FieldPlacement {
        FieldPlacement {
            field_id: id.to_string(),
            document_id: document_id.to_string(),
            recipient_index: 0,
            kind,
            page: 1,
            x: 0.1,
            y: 0.1,
            width: 0.2,
            height: 0.05,
            required,
            label: None,
        }
    }

    fn envelope(docs: &[&str]) -> RequestGroup {
        RequestGroup {
            group_id: "g".to_string(),
            owner: Owner {
                id: "o".to_string(),
                name: "Owner".to_string(),
                email: "o@example.com".to_string(),
            },
            title: "Onboarding".to_string(),
            documents: docs.iter().map(|d| doc(d)).collect(),
            recipients: vec![],
            signing_order: SigningOrder::Any,
            view_mode: ViewMode::Isolated,
            status: GroupStatus::PendingSignature,
            status_reason: None,
            artifact_ref: None,
            document_artifacts: BTreeMap::new(),
            expiration_policy: ExpirationPolicy::default(),
            finalization: FinalizationState::default(),
            created_at: Utc::now(),
            completed_at: None,
            declined_at: None,
            cancelled_at: None,
        }
    }

    fn entry(fields: Vec<FieldPlacement>) -> LedgerEntry {
        LedgerEntry {
            entry_id: "e".to_string(),
            group_id: "g".to_string(),
            recipient_index: 0,
            link_id: "l".to_string(),
            identity: Identity::signer("Cy", "cy@example.com"),
            assigned_fields: fields,
            status: RecipientStatus::Viewed,
            signed_documents: BTreeSet::new(),
            signed_payload: None,
            timestamps: LedgerTimestamps::default(),
            decline_reason: None,
            cancel_reason: None,
            access_policy: AccessPolicy::default(),
            verification: VerificationState::default(),
            delegation: None,
            reassignments: Vec::new(),
        }
    }

    fn values(pairs: &[(&str, serde_json::Value)]) -> SignedPayload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_single_document_sign_completes_entry() {
        let group = envelope(&["nda"]);
        let e = entry(vec![field("sig", "nda", FieldKind::Signature, true)]);
        let plan = plan_signature(&group, &e, None, &values(&[("sig", json!("Cy"))])).unwrap();
        assert!(plan.fully_signed);
        assert_eq!(plan.signed_documents.len(), 1);
    }

    #[test]
    fn test_partial_envelope_signature() {
        let group = envelope(&["a", "b"]);
        let e = entry(vec![
            field("sig-a", "a", FieldKind::Signature, true),
            field("sig-b", "b", FieldKind::Signature, true),
        ]);
        let requested = vec!["a".to_string()];
        let plan =
            plan_signature(&group, &e, Some(&requested), &values(&[("sig-a", json!("Cy"))]))
                .unwrap();
        assert!(!plan.fully_signed);
        assert_eq!(plan.newly_signed, BTreeSet::from(["a".to_string()]));

        let mut e = e;
        e.signed_documents = plan.signed_documents;
        e.signed_payload = Some(plan.payload);
        let plan = plan_signature(&group, &e, None, &values(&[("sig-b", json!("Cy"))])).unwrap();
        assert!(plan.fully_signed);
        assert_eq!(plan.payload.len(), 2);
    }

    #[test]
    fn test_documents_without_fields_ride_along() {
        let group = envelope(&["a", "appendix"]);
        let e = entry(vec![field("sig-a", "a", FieldKind::Signature, true)]);
        let requested = vec!["a".to_string()];
        let plan =
            plan_signature(&group, &e, Some(&requested), &values(&[("sig-a", json!("Cy"))]))
                .unwrap();
        assert!(plan.fully_signed);
    }

    #[test]
    fn test_missing_required_value_rejected() {
        let group = envelope(&["nda"]);
        let e = entry(vec![
            field("sig", "nda", FieldKind::Signature, true),
            field("note", "nda", FieldKind::Text, false),
        ]);
        let err = plan_signature(&group, &e, None, &values(&[("note", json!("hi"))])).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = plan_signature(&group, &e, None, &values(&[("sig", json!("   "))])).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_unknown_field_and_document_rejected() {
        let group = envelope(&["a", "b"]);
        let e = entry(vec![
            field("sig-a", "a", FieldKind::Signature, true),
            field("sig-b", "b", FieldKind::Signature, true),
        ]);

        let err = plan_signature(&group, &e, None, &values(&[("other", json!("x"))])).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let requested = vec!["zzz".to_string()];
        let err = plan_signature(&group, &e, Some(&requested), &SignedPayload::new()).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        // Value for a document that is not part of this action.
        let requested = vec!["a".to_string()];
        let err = plan_signature(
            &group,
            &e,
            Some(&requested),
            &values(&[("sig-a", json!("Cy")), ("sig-b", json!("Cy"))]),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_resigning_a_document_conflicts() {
        let group = envelope(&["a", "b"]);
        let mut e = entry(vec![field("sig-a", "a", FieldKind::Signature, true)]);
        e.signed_documents.insert("a".to_string());
        let requested = vec!["a".to_string()];
        let err = plan_signature(&group, &e, Some(&requested), &SignedPayload::new()).unwrap_err();
        assert_eq!(err.error_code(), "STATE_CONFLICT");
    }

    #[test]
    fn test_value_kinds() {
        let group = envelope(&["nda"]);
        let e = entry(vec![
            field("agree", "nda", FieldKind::Checkbox, true),
            field("date", "nda", FieldKind::Date, true),
        ]);
        let ok = values(&[("agree", json!(true)), ("date", json!("2026-03-01"))]);
        assert!(plan_signature(&group, &e, None, &ok).is_ok());

        let bad_date = values(&[("agree", json!(true)), ("date", json!("March 1st"))]);
        assert!(plan_signature(&group, &e, None, &bad_date).is_err());

        let unchecked = values(&[("agree", json!(false)), ("date", json!("2026-03-01"))]);
        assert!(plan_signature(&group, &e, None, &unchecked).is_err());
    }

    #[test]
    fn test_values_for_document_filters_fields() {
        let mut e = entry(vec![
            field("sig-a", "a", FieldKind::Signature, true),
            field("sig-b", "b", FieldKind::Signature, true),
        ]);
        e.signed_payload = Some(values(&[("sig-a", json!("A")), ("sig-b", json!("B"))]));
        let only_a = values_for_document(&e, "a");
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a["sig-a"], json!("A"));
    }
}
