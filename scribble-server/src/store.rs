//! Blob storage keyed by sync id.
//!
//! The [`BlobStore`] keeps the latest merged blob for every sync id as
//! serialized JSON text. A PUT is a read-merge-write performed entirely under
//! the write lock, so two concurrent pushes to the same sync id are applied
//! one after the other and neither is lost.
//!
//! When a data directory is configured every write is mirrored to
//! `blob_<sync id>.json` and the directory is loaded back on startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use scribble_proto::codec::{self, CodecError};
use scribble_proto::merge_values;
use serde_json::Value;
use tokio::sync::RwLock;

/// File name prefix for persisted blobs.
const BLOB_FILE_PREFIX: &str = "blob_";

/// Errors that can occur while storing a blob.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The merged state could not be serialized.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Writing the blob to disk failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-sync-id blob store with optional file persistence.
pub struct BlobStore {
    blobs: RwLock<HashMap<String, String>>,
    data_dir: Option<PathBuf>,
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    /// Opens a store persisted under `dir`, loading any blobs already there.
    ///
    /// The directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created or read.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut blobs = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(sync_id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(BLOB_FILE_PREFIX))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let contents = tokio::fs::read_to_string(entry.path()).await?;
            blobs.insert(sync_id.to_string(), contents);
        }

        tracing::info!(dir = %dir.display(), blobs = blobs.len(), "loaded blob store");
        Ok(Self {
            blobs: RwLock::new(blobs),
            data_dir: Some(dir),
        })
    }

    /// Returns the stored blob text for `sync_id`, if any.
    pub async fn get(&self, sync_id: &str) -> Option<String> {
        self.blobs.read().await.get(sync_id).cloned()
    }

    /// Merges `incoming` into the blob stored for `sync_id` and stores the
    /// result, returning the merged blob text.
    ///
    /// A stored blob that no longer parses is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the merged blob cannot be encoded or
    /// persisted. The in-memory copy is left unchanged in that case.
    pub async fn merge_put(
        &self,
        sync_id: &str,
        incoming: &Value,
        now: u64,
    ) -> Result<String, StoreError> {
        let mut blobs = self.blobs.write().await;

        let stored: Option<Value> = blobs
            .get(sync_id)
            .and_then(|raw| serde_json::from_str(raw).ok());
        let merged = merge_values(stored.as_ref(), incoming, now);
        let text = String::from_utf8(codec::encode_blob(&merged)?)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;

        if let Some(dir) = &self.data_dir {
            write_blob_file(dir, sync_id, &text).await?;
        }
        blobs.insert(sync_id.to_string(), text.clone());
        drop(blobs);

        tracing::debug!(
            sync_id,
            tasks = merged.tasks.len(),
            tombstones = merged.tombstones.len(),
            "stored merged blob"
        );
        Ok(text)
    }

    /// Returns the number of sync ids with a stored blob.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

/// Writes a blob file via a temporary file and rename.
async fn write_blob_file(dir: &Path, sync_id: &str, text: &str) -> std::io::Result<()> {
    let path = dir.join(format!("{BLOB_FILE_PREFIX}{sync_id}.json"));
    let tmp = dir.join(format!("{BLOB_FILE_PREFIX}{sync_id}.json.tmp"));
    tokio::fs::write(&tmp, text).await?;
    tokio::fs::rename(&tmp, &path).await
}
