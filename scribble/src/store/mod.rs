//! Device-local persistent key/value storage.
//!
//! Defines the [`KeyValueStore`] trait the rest of the client persists
//! through. Values are JSON documents. Implementations:
//! - [`memory::MemoryStore`] for tests and throwaway sessions
//! - [`file::FileStore`] backed by a single JSON file on disk

pub mod file;
pub mod memory;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Well-known keys written by the client.
pub mod keys {
    /// Consolidated state record.
    pub const STATE: &str = "state";
    /// Time of the last sync attempt, successful or not.
    pub const LAST_SYNC_ATTEMPT: &str = "last_sync_attempt";
    /// Time of the last successful sync.
    pub const LAST_SYNC_SUCCESS: &str = "last_sync_success";
    /// Expiry of the sync lease.
    pub const SYNC_LOCK_UNTIL: &str = "sync_lock_until";
    /// Whether local state has unpushed changes.
    pub const DIRTY: &str = "dirty";
    /// Last generated task id.
    pub const LAST_TASK_ID: &str = "last_task_id";
    /// Remote endpoint `{ base, syncId, token }`.
    pub const SYNC_CONFIG: &str = "sync_config";
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file exists but is not a JSON object.
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    /// A value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Async key/value store holding JSON values.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically replaces the value under `key` with `new` if the current
    /// value equals `expected` (`None` meaning absent).
    ///
    /// Returns `true` if the swap happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

impl<S: KeyValueStore> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).remove(key)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        (**self).compare_and_swap(key, expected, new)
    }
}

/// Reads a millisecond timestamp scalar, treating absent or unreadable
/// values as `0`.
///
/// # Errors
///
/// Returns [`StoreError`] if the store cannot be read.
pub async fn get_millis<S: KeyValueStore>(store: &S, key: &str) -> Result<u64, StoreError> {
    Ok(store
        .get(key)
        .await?
        .map_or(0, |v| scribble_proto::normalize::to_millis(&v)))
}

/// Reads a boolean flag, treating anything but `true` as `false`.
///
/// # Errors
///
/// Returns [`StoreError`] if the store cannot be read.
pub async fn get_flag<S: KeyValueStore>(store: &S, key: &str) -> Result<bool, StoreError> {
    Ok(matches!(store.get(key).await?, Some(Value::Bool(true))))
}
