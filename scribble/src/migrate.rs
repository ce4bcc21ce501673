//! Startup schema loader.
//!
//! Devices that predate the consolidated `state` record kept each field of
//! the state under its own key. On first start with this layout missing, the
//! legacy keys are folded into a `state` record, the state is marked dirty so
//! the next sync publishes it, and the legacy keys are left untouched.

use serde_json::{Map, Value};

use scribble_proto::codec;
use scribble_proto::normalize;

use crate::store::{KeyValueStore, StoreError, keys};

/// Flat keys written by the legacy layout.
pub const LEGACY_KEYS: [&str; 5] = [
    "todos",
    "deleted_task_ids",
    "selected_group",
    "user_name",
    "updatedAt",
];

/// Synthesizes the `state` record from legacy keys if it is absent.
///
/// Returns `true` if a record was written.
///
/// # Errors
///
/// Returns [`StoreError`] if the store cannot be read or written.
pub async fn migrate_legacy<S: KeyValueStore>(store: &S, now: u64) -> Result<bool, StoreError> {
    if store.get(keys::STATE).await?.is_some() {
        return Ok(false);
    }

    let mut legacy = Map::new();
    for key in LEGACY_KEYS {
        if let Some(value) = store.get(key).await? {
            legacy.insert(key.to_string(), value);
        }
    }
    if legacy.is_empty() {
        return Ok(false);
    }

    let state = normalize::state_from_record(&Value::Object(legacy), now);
    let record =
        codec::record_to_value(&state).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(keys::STATE, record).await?;
    store.set(keys::DIRTY, Value::Bool(true)).await?;

    tracing::info!(
        tasks = state.tasks.len(),
        tombstones = state.tombstones.len(),
        "migrated legacy local state"
    );
    Ok(true)
}
