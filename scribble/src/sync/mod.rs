//! Synchronization with the remote blob store.
//!
//! - [`remote`] defines the [`BlobRemote`](remote::BlobRemote) trait with
//!   HTTP and loopback implementations.
//! - [`lease`] implements the advisory sync lease.
//! - [`orchestrator`] runs one gated, leased pull/push attempt.

pub mod lease;
pub mod orchestrator;
pub mod remote;

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::local::LocalError;
use crate::store::{KeyValueStore, StoreError, keys};

/// Longest accepted sync id.
const MAX_SYNC_ID_LEN: usize = 100;

/// Errors that abort a sync attempt.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote rejected the token.
    #[error("unauthorized: check the sync token")]
    Unauthorized,

    /// Network failure, unexpected status, or unreadable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// No remote endpoint is configured.
    #[error("sync is not configured")]
    NotConfigured,

    /// Another sync attempt holds the lease.
    #[error("sync already running")]
    LockBusy,

    /// The local store failed.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// Local state could not be persisted.
    #[error("local state error: {0}")]
    Local(#[from] LocalError),
}

/// Outcome of one call to the orchestrator.
#[derive(Debug)]
pub enum SyncReport {
    /// The attempt ran to completion.
    Synced {
        /// A newer remote state was adopted.
        pulled: bool,
        /// Local changes were pushed and the merged result adopted.
        pushed: bool,
    },
    /// The last attempt is too recent and the call was not forced.
    NotDue,
    /// No remote endpoint is configured.
    NotConfigured,
    /// Another attempt holds the lease.
    LockBusy,
    /// The attempt started and failed.
    Failed(SyncError),
}

impl SyncReport {
    /// Returns `true` for a completed attempt.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    /// Splits off a failed attempt as an error. Skipped attempts
    /// (not due, not configured, lease busy) are not errors.
    ///
    /// # Errors
    ///
    /// Returns the [`SyncError`] carried by [`SyncReport::Failed`].
    pub fn into_result(self) -> Result<Self, SyncError> {
        match self {
            Self::Failed(e) => Err(e),
            other => Ok(other),
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced { pulled, pushed } => match (pulled, pushed) {
                (false, false) => write!(f, "already in sync"),
                (true, false) => write!(f, "synced: pulled remote changes"),
                (false, true) => write!(f, "synced: pushed local changes"),
                (true, true) => write!(f, "synced: pulled and pushed changes"),
            },
            Self::NotDue => write!(f, "sync not due yet"),
            Self::NotConfigured => write!(f, "sync is not configured"),
            Self::LockBusy => write!(f, "sync already running"),
            Self::Failed(e) => write!(f, "sync failed: {e}"),
        }
    }
}

/// Errors building a [`SyncEndpoint`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The base URL does not parse or is not http(s).
    #[error("invalid base url {0:?}")]
    InvalidBase(String),

    /// The sync id is empty, too long, or has characters outside
    /// `[A-Za-z0-9_-]`.
    #[error("invalid sync id {0:?}")]
    InvalidSyncId(String),
}

/// Where and how to reach the remote blob for one sync id.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncEndpoint {
    base: Url,
    sync_id: String,
    token: String,
}

impl fmt::Debug for SyncEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEndpoint")
            .field("base", &self.base.as_str())
            .field("sync_id", &self.sync_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl SyncEndpoint {
    /// Validates and builds an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if `base` is not an http(s) URL or
    /// `sync_id` is malformed.
    pub fn new(base: &str, sync_id: &str, token: &str) -> Result<Self, EndpointError> {
        let parsed =
            Url::parse(base.trim()).map_err(|_| EndpointError::InvalidBase(base.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EndpointError::InvalidBase(base.to_string()));
        }

        let sync_id = sync_id.trim();
        let valid_id = (1..=MAX_SYNC_ID_LEN).contains(&sync_id.len())
            && sync_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid_id {
            return Err(EndpointError::InvalidSyncId(sync_id.to_string()));
        }

        Ok(Self {
            base: parsed,
            sync_id: sync_id.to_string(),
            token: token.trim().to_string(),
        })
    }

    /// Sync identifier.
    #[must_use]
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    /// Bearer token sent with every request.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Base URL as configured.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Full blob URL, `{base}/v1/blob/{sync_id}`.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::InvalidBase`] if the joined URL does not
    /// parse.
    pub fn blob_url(&self) -> Result<Url, EndpointError> {
        let joined = format!(
            "{}/v1/blob/{}",
            self.base.as_str().trim_end_matches('/'),
            self.sync_id
        );
        Url::parse(&joined).map_err(|_| EndpointError::InvalidBase(self.base.to_string()))
    }

    /// Builds the endpoint described by a stored `sync_config` record.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the record's values are invalid.
    pub fn from_record(record: &SyncConfigRecord) -> Result<Self, EndpointError> {
        Self::new(&record.base, &record.sync_id, &record.token)
    }

    /// The `sync_config` record describing this endpoint.
    #[must_use]
    pub fn to_record(&self) -> SyncConfigRecord {
        SyncConfigRecord {
            base: self.base.to_string(),
            sync_id: self.sync_id.clone(),
            token: self.token.clone(),
        }
    }
}

/// Stored layout of the remote endpoint under the `sync_config` key.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigRecord {
    /// Base URL of the blob server.
    pub base: String,
    /// Sync identifier.
    #[serde(rename = "syncId")]
    pub sync_id: String,
    /// Bearer token.
    pub token: String,
}

impl fmt::Debug for SyncConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfigRecord")
            .field("base", &self.base)
            .field("sync_id", &self.sync_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Stores `endpoint` as this device's `sync_config` record.
///
/// # Errors
///
/// Returns [`StoreError`] if the record cannot be written.
pub async fn save_endpoint<S: KeyValueStore>(
    store: &S,
    endpoint: &SyncEndpoint,
) -> Result<(), StoreError> {
    let record = serde_json::to_value(endpoint.to_record())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(keys::SYNC_CONFIG, record).await
}

/// Drops the stored `sync_config` record. Returns whether one existed.
///
/// # Errors
///
/// Returns [`StoreError`] if the store cannot be read or written.
pub async fn forget_endpoint<S: KeyValueStore>(store: &S) -> Result<bool, StoreError> {
    if store.get(keys::SYNC_CONFIG).await?.is_none() {
        return Ok(false);
    }
    store.remove(keys::SYNC_CONFIG).await?;
    Ok(true)
}
