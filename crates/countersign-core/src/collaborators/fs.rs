// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem blob store.
//!
//! Blobs are content-addressed: the reference is `sha256:<hex digest>` and the
//! bytes live at `<root>/<first two hex chars>/<hex digest>`. Writes go to a
//! temporary file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{BlobMeta, BlobStore, BlobStoreError};

const REF_PREFIX: &str = "sha256:";

/// Content-addressed blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, blob_ref: &str) -> Result<PathBuf, BlobStoreError> {
        let digest = blob_ref
            .strip_prefix(REF_PREFIX)
            .filter(|d| d.len() == 64 && d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| BlobStoreError::InvalidRef(blob_ref.to_string()))?;
        Ok(self.root.join(&digest[..2]).join(digest))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.path_for(blob_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(blob_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, bytes: Vec<u8>, meta: &BlobMeta) -> Result<String, BlobStoreError> {
        let blob_ref = format!("{}{}", REF_PREFIX, hex::encode(Sha256::digest(&bytes)));
        let path = self.path_for(&blob_ref)?;

        if tokio::fs::try_exists(&path).await? {
            return Ok(blob_ref);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(
            blob_ref = %blob_ref,
            content_type = %meta.content_type,
            display_name = %meta.display_name,
            size = bytes.len(),
            "Stored blob"
        );
        Ok(blob_ref)
    }
}
