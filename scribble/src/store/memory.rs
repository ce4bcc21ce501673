//! In-memory [`KeyValueStore`] for testing.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use super::{KeyValueStore, StoreError};

/// In-memory store backed by a mutex-guarded map.
///
/// `compare_and_swap` is atomic within the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given entries.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: Mutex::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Returns the stored keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.lock().keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let mut values = self.values.lock();
        if values.get(key) != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), new);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", json!(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn compare_and_swap_checks_current_value() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("k", None, json!(1)).await.unwrap());
        assert!(!store.compare_and_swap("k", None, json!(2)).await.unwrap());
        assert!(!store.compare_and_swap("k", Some(&json!(5)), json!(2)).await.unwrap());
        assert!(store.compare_and_swap("k", Some(&json!(1)), json!(2)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    #[test]
    fn with_entries_prepopulates() {
        let store = MemoryStore::with_entries([("b", json!(2)), ("a", json!(1))]);
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
