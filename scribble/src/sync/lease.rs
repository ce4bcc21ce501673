//! Advisory sync lease.
//!
//! A lease is an expiry timestamp under `sync_lock_until`. It is taken with
//! the store's compare-and-swap so two attempts in one process cannot both
//! win; across processes it is only as strong as the store's CAS. A missed
//! race is harmless because the remote re-merges every push.
//!
//! Async code cannot release in `Drop`, so callers must call
//! [`SyncLease::release`] on every path. A lease that is never released
//! (process killed mid-sync) simply expires.

use serde_json::Value;

use scribble_proto::normalize::to_millis;

use crate::store::{KeyValueStore, StoreError, keys};

/// Default lease lifetime (2 minutes).
pub const DEFAULT_LEASE_TTL_MS: u64 = 2 * 60 * 1000;

/// A held sync lease.
#[derive(Debug)]
#[must_use = "a lease must be released"]
pub struct SyncLease {
    until: u64,
}

impl SyncLease {
    /// Tries to take the lease at `now` for `ttl_ms`.
    ///
    /// Returns `Ok(None)` while another live lease is held or if another
    /// attempt took it first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read or written.
    pub async fn acquire<S: KeyValueStore>(
        store: &S,
        now: u64,
        ttl_ms: u64,
    ) -> Result<Option<Self>, StoreError> {
        let current = store.get(keys::SYNC_LOCK_UNTIL).await?;
        if current.as_ref().map_or(0, to_millis) > now {
            return Ok(None);
        }

        let until = now.saturating_add(ttl_ms).max(1);
        let taken = store
            .compare_and_swap(keys::SYNC_LOCK_UNTIL, current.as_ref(), Value::from(until))
            .await?;
        if !taken {
            tracing::debug!("lost sync lease race");
            return Ok(None);
        }
        Ok(Some(Self { until }))
    }

    /// Expiry of this lease.
    #[must_use]
    pub const fn until(&self) -> u64 {
        self.until
    }

    /// Releases the lease unless someone else has replaced it since.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be written.
    pub async fn release<S: KeyValueStore>(self, store: &S) -> Result<(), StoreError> {
        let released = store
            .compare_and_swap(
                keys::SYNC_LOCK_UNTIL,
                Some(&Value::from(self.until)),
                Value::from(0_u64),
            )
            .await?;
        if !released {
            tracing::warn!(until = self.until, "sync lease was taken over before release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn acquire_release_cycle() {
        let store = MemoryStore::new();
        let lease = SyncLease::acquire(&store, 1_000, DEFAULT_LEASE_TTL_MS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.until(), 1_000 + DEFAULT_LEASE_TTL_MS);

        lease.release(&store).await.unwrap();
        assert_eq!(store.get(keys::SYNC_LOCK_UNTIL).await.unwrap(), Some(json!(0)));
        assert!(SyncLease::acquire(&store, 1_001, DEFAULT_LEASE_TTL_MS)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn live_lease_blocks() {
        let store = MemoryStore::new();
        let _held = SyncLease::acquire(&store, 1_000, 500).await.unwrap().unwrap();
        assert!(SyncLease::acquire(&store, 1_499, 500).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken() {
        let store = MemoryStore::with_entries([(keys::SYNC_LOCK_UNTIL, json!(1_500))]);
        let lease = SyncLease::acquire(&store, 1_500, 500).await.unwrap();
        assert_eq!(lease.map(|l| l.until()), Some(2_000));
    }

    #[tokio::test]
    async fn release_does_not_clobber_newer_lease() {
        let store = MemoryStore::new();
        let stale = SyncLease::acquire(&store, 1_000, 100).await.unwrap().unwrap();
        // Stale lease expired and another attempt took over.
        let fresh = SyncLease::acquire(&store, 2_000, 100).await.unwrap().unwrap();

        stale.release(&store).await.unwrap();
        assert_eq!(
            store.get(keys::SYNC_LOCK_UNTIL).await.unwrap(),
            Some(json!(fresh.until()))
        );
    }
}
