// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Artifact assembler producing JSON signing certificates.
//!
//! Each finalized document becomes a certificate that pins the source bytes by
//! SHA-256 and lists every signer with the values they supplied for that
//! document. An envelope additionally gets a manifest listing the per-document
//! certificates.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{ArtifactAssembler, AssemblerError, BlobMeta, BlobStore, SignerRecord};
use crate::model::{DocumentRef, RequestGroup};

const CERTIFICATE_FORMAT: &str = "countersign.certificate.v1";
const ENVELOPE_FORMAT: &str = "countersign.envelope.v1";

/// Writes certificates and envelope manifests into a blob store.
#[derive(Clone)]
pub struct ManifestAssembler {
    blob_store: Arc<dyn BlobStore>,
}

impl ManifestAssembler {
    /// Create an assembler that reads sources from and writes artifacts to `blob_store`.
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self { blob_store }
    }
}

#[async_trait]
impl ArtifactAssembler for ManifestAssembler {
    async fn compose(
        &self,
        group: &RequestGroup,
        document: &DocumentRef,
        signers: &[SignerRecord],
    ) -> Result<String, AssemblerError> {
        let source = self.blob_store.get(&document.blob_ref).await?;
        let source_sha256 = hex::encode(Sha256::digest(&source));

        let certificate = json!({
            "format": CERTIFICATE_FORMAT,
            "group_id": group.group_id,
            "title": group.title,
            "owner": { "name": group.owner.name, "email": group.owner.email },
            "document": {
                "document_id": document.document_id,
                "display_name": document.display_name,
                "page_count": document.page_count,
                "source_ref": document.blob_ref,
                "source_sha256": source_sha256,
            },
            "signers": signers,
            "completed_at": group.completed_at,
            "generated_at": Utc::now(),
        });

        let bytes = serde_json::to_vec_pretty(&certificate)?;
        let meta = BlobMeta {
            content_type: "application/json".to_string(),
            display_name: format!("{} (signed).json", document.display_name),
        };
        Ok(self.blob_store.put(bytes, &meta).await?)
    }

    async fn compose_envelope(
        &self,
        group: &RequestGroup,
        document_artifacts: &BTreeMap<String, String>,
        signers: &[SignerRecord],
    ) -> Result<String, AssemblerError> {
        let documents: Vec<_> = group
            .documents
            .iter()
            .map(|d| {
                json!({
                    "document_id": d.document_id,
                    "display_name": d.display_name,
                    "artifact_ref": document_artifacts.get(&d.document_id),
                })
            })
            .collect();

        let signer_summary: Vec<_> = signers
            .iter()
            .map(|s| {
                json!({
                    "recipient_index": s.recipient_index,
                    "name": s.identity.name,
                    "email": s.identity.email,
                    "signed_at": s.signed_at,
                })
            })
            .collect();

        let manifest = json!({
            "format": ENVELOPE_FORMAT,
            "group_id": group.group_id,
            "title": group.title,
            "documents": documents,
            "signers": signer_summary,
            "completed_at": group.completed_at,
            "generated_at": Utc::now(),
        });

        let bytes = serde_json::to_vec_pretty(&manifest)?;
        let meta = BlobMeta {
            content_type: "application/json".to_string(),
            display_name: format!("{} (envelope).json", group.title),
        };
        Ok(self.blob_store.put(bytes, &meta).await?)
    }
}
