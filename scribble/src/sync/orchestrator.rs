//! One sync attempt: gate, lease, pull, push.
//!
//! Checks run in order: endpoint configured, attempt due (or forced), lease
//! free. The attempt time is recorded as soon as the lease is held, before
//! any network I/O, so a failing remote is retried at most once per
//! interval. The lease is released whatever the outcome.

use serde_json::Value;

use crate::local::LocalState;
use crate::store::{self, KeyValueStore, keys};

use super::lease::{DEFAULT_LEASE_TTL_MS, SyncLease};
use super::remote::BlobRemote;
use super::{SyncError, SyncReport};

/// Default minimum time between unforced attempts (24 hours).
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Timing knobs for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum time between unforced attempts.
    pub interval_ms: u64,
    /// Lease lifetime.
    pub lease_ttl_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
        }
    }
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Ignore the attempt interval.
    pub force: bool,
    /// Adopt the remote state even if it is not newer, or local is dirty.
    pub adopt_remote: bool,
}

/// Runs sync attempts against an optional remote.
#[derive(Debug)]
pub struct SyncOrchestrator<R> {
    remote: Option<R>,
    settings: SyncSettings,
}

impl<R: BlobRemote> SyncOrchestrator<R> {
    /// Creates an orchestrator. `remote` of `None` means sync is not
    /// configured and every call reports so.
    #[must_use]
    pub const fn new(remote: Option<R>, settings: SyncSettings) -> Self {
        Self { remote, settings }
    }

    /// The configured remote, if any.
    #[must_use]
    pub const fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    /// Whether an unforced attempt at `now` would proceed past gating.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the last attempt cannot be read.
    pub async fn is_due<S: KeyValueStore>(&self, store: &S, now: u64) -> Result<bool, SyncError> {
        let last = store::get_millis(store, keys::LAST_SYNC_ATTEMPT).await?;
        Ok(last == 0 || last > now || now - last >= self.settings.interval_ms)
    }

    /// Runs one attempt and reports its outcome.
    pub async fn run<S: KeyValueStore>(
        &self,
        local: &mut LocalState<S>,
        options: SyncOptions,
        now: u64,
    ) -> SyncReport {
        let report = match self.attempt(local, options, now).await {
            Ok(Some((pulled, pushed))) => SyncReport::Synced { pulled, pushed },
            Ok(None) => SyncReport::NotDue,
            Err(SyncError::NotConfigured) => SyncReport::NotConfigured,
            Err(SyncError::LockBusy) => SyncReport::LockBusy,
            Err(e) => SyncReport::Failed(e),
        };
        match &report {
            SyncReport::Failed(e) => tracing::warn!(error = %e, "sync attempt failed"),
            other => tracing::info!(outcome = %other, "sync attempt finished"),
        }
        report
    }

    /// Gate, lease, and run. `Ok(None)` means not due.
    async fn attempt<S: KeyValueStore>(
        &self,
        local: &mut LocalState<S>,
        options: SyncOptions,
        now: u64,
    ) -> Result<Option<(bool, bool)>, SyncError> {
        let remote = self.remote.as_ref().ok_or(SyncError::NotConfigured)?;
        if !options.force && !self.is_due(local.store(), now).await? {
            return Ok(None);
        }

        let lease = SyncLease::acquire(local.store(), now, self.settings.lease_ttl_ms)
            .await?
            .ok_or(SyncError::LockBusy)?;

        let outcome = match local
            .store()
            .set(keys::LAST_SYNC_ATTEMPT, Value::from(now))
            .await
        {
            Ok(()) => pull_push(remote, local, options).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = lease.release(local.store()).await {
            tracing::warn!(error = %e, "failed to release sync lease");
        }

        let (pulled, pushed) = outcome?;
        local
            .store()
            .set(keys::LAST_SYNC_SUCCESS, Value::from(now))
            .await?;
        Ok(Some((pulled, pushed)))
    }
}

/// Pull then push. Returns `(pulled, pushed)`.
///
/// A newer remote state is adopted only while local has no unpushed
/// changes; otherwise the push below merges both and the converged state
/// comes back. Adopted pull results are persisted immediately so they
/// survive a failing push.
async fn pull_push<S, R>(
    remote: &R,
    local: &mut LocalState<S>,
    options: SyncOptions,
) -> Result<(bool, bool), SyncError>
where
    S: KeyValueStore,
    R: BlobRemote,
{
    let mut pulled = false;
    if let Some(remote_state) = remote.fetch().await? {
        let newer = remote_state.updated_at > local.state().updated_at;
        if options.adopt_remote || (newer && !local.is_dirty()) {
            local.adopt(remote_state);
            local.persist().await?;
            pulled = true;
        } else if newer {
            tracing::debug!("remote is newer but local has unpushed changes; merging on push");
        }
    }

    let mut pushed = false;
    if local.is_dirty() {
        let merged = remote.push_and_merge(local.state()).await?;
        local.adopt(merged);
        local.mark_clean();
        local.persist().await?;
        pushed = true;
    }

    Ok((pulled, pushed))
}
