//! JSON encodings of [`AppState`].
//!
//! Two layouts exist:
//! - the wire blob exchanged with the server, `{ "updatedAt", "data": {..} }`
//! - the flat record a device persists locally, with `updatedAt` and a
//!   `schema_version` next to the task fields.
//!
//! Encoding is typed; decoding always goes through [`crate::normalize`] so
//! that documents written by older schemas are accepted.

use serde::Serialize;
use serde_json::Value;

use crate::normalize;
use crate::state::{AppState, Tombstones};
use crate::task::Task;

/// Current version of the local record layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes are not JSON at all.
    #[error("invalid json: {0}")]
    InvalidJson(String),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The `data` object of a wire blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlobData {
    /// Live tasks, ascending by id.
    pub todos: Vec<Task>,
    /// Tombstones keyed by task id.
    pub deleted_task_ids: Tombstones,
    /// Selected group label.
    pub selected_group: String,
    /// User display name.
    pub user_name: String,
}

/// Wire representation of a state stored under one sync id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Blob {
    /// Timestamp of the state in ms.
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
    /// Task list and metadata.
    pub data: BlobData,
}

impl From<&AppState> for Blob {
    fn from(state: &AppState) -> Self {
        Self {
            updated_at: state.updated_at,
            data: BlobData {
                todos: state.tasks.clone(),
                deleted_task_ids: state.tombstones.clone(),
                selected_group: state.selected_group.clone(),
                user_name: state.user_name.clone(),
            },
        }
    }
}

/// Local persisted layout of a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateRecord {
    /// Live tasks.
    pub todos: Vec<Task>,
    /// Tombstones keyed by task id.
    pub deleted_task_ids: Tombstones,
    /// Selected group label.
    pub selected_group: String,
    /// User display name.
    pub user_name: String,
    /// Timestamp of the state in ms.
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
    /// Layout version, [`SCHEMA_VERSION`] for records written by this crate.
    pub schema_version: u32,
}

impl From<&AppState> for StateRecord {
    fn from(state: &AppState) -> Self {
        Self {
            todos: state.tasks.clone(),
            deleted_task_ids: state.tombstones.clone(),
            selected_group: state.selected_group.clone(),
            user_name: state.user_name.clone(),
            updated_at: state.updated_at,
            schema_version: SCHEMA_VERSION,
        }
    }
}

/// Converts a state to its wire blob as a JSON value.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn blob_to_value(state: &AppState) -> Result<Value, CodecError> {
    serde_json::to_value(Blob::from(state)).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a state as wire blob bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode_blob(state: &AppState) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&Blob::from(state)).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes wire blob bytes.
///
/// A JSON `null` body means no blob exists yet and yields `Ok(None)`. Any
/// other JSON value is normalized liberally.
///
/// # Errors
///
/// Returns [`CodecError::InvalidJson`] if the bytes are not JSON.
pub fn decode_blob(bytes: &[u8], now: u64) -> Result<Option<AppState>, CodecError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    Ok(blob_from_value(&value, now))
}

/// Normalizes an already-parsed wire blob; `null` yields `None`.
#[must_use]
pub fn blob_from_value(value: &Value, now: u64) -> Option<AppState> {
    if value.is_null() {
        None
    } else {
        Some(normalize::state_from_blob(value, now))
    }
}

/// Converts a state to its local record as a JSON value.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn record_to_value(state: &AppState) -> Result<Value, CodecError> {
    serde_json::to_value(StateRecord::from(state))
        .map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Normalizes a local record value.
#[must_use]
pub fn record_from_value(value: &Value, now: u64) -> AppState {
    normalize::state_from_record(value, now)
}
