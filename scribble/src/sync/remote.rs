//! Remote blob protocol client.
//!
//! Defines the [`BlobRemote`] trait the orchestrator talks to. Concrete
//! implementations:
//! - [`HttpBlobRemote`] speaks the blob server's HTTP API
//! - [`LoopbackRemote`] keeps the blob in process and runs the merge engine
//!   itself, for tests and offline demos

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use scribble_proto::codec;
use scribble_proto::{AppState, clock, merge};

use super::{SyncEndpoint, SyncError};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Access to the remote blob for one sync id.
///
/// The remote always merges a push into what it already holds and returns
/// the converged result; callers must adopt the returned state rather than
/// assume their own state was stored verbatim.
pub trait BlobRemote: Send + Sync {
    /// Fetches the remote state. `Ok(None)` means no blob exists yet.
    fn fetch(&self) -> impl Future<Output = Result<Option<AppState>, SyncError>> + Send;

    /// Pushes `local` and returns the merged state the remote now holds.
    fn push_and_merge(
        &self,
        local: &AppState,
    ) -> impl Future<Output = Result<AppState, SyncError>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// [`BlobRemote`] over HTTP using bearer token auth.
#[derive(Debug, Clone)]
pub struct HttpBlobRemote {
    client: reqwest::Client,
    endpoint: SyncEndpoint,
    timeout: Duration,
}

impl HttpBlobRemote {
    /// Creates a remote for `endpoint` with the given per-request timeout.
    #[must_use]
    pub fn new(endpoint: SyncEndpoint, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }

    /// Endpoint this remote talks to.
    #[must_use]
    pub const fn endpoint(&self) -> &SyncEndpoint {
        &self.endpoint
    }

    fn url(&self) -> Result<url::Url, SyncError> {
        self.endpoint
            .blob_url()
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    /// Maps a response to its body bytes, classifying failure statuses.
    async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, SyncError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SyncError::Unauthorized);
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!("HTTP {status}")));
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Transport("request timed out".to_string())
    } else if error.is_connect() {
        SyncError::Transport(format!("connection failed: {error}"))
    } else {
        SyncError::Transport(error.to_string())
    }
}

impl BlobRemote for HttpBlobRemote {
    async fn fetch(&self) -> Result<Option<AppState>, SyncError> {
        let response = self
            .client
            .get(self.url()?)
            .bearer_auth(self.endpoint.token())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::read_body(response).await?;

        let remote = codec::decode_blob(&body, clock::now_ms())
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        tracing::debug!(
            sync_id = self.endpoint.sync_id(),
            present = remote.is_some(),
            "fetched remote blob"
        );
        Ok(remote)
    }

    async fn push_and_merge(&self, local: &AppState) -> Result<AppState, SyncError> {
        let payload =
            codec::encode_blob(local).map_err(|e| SyncError::Transport(e.to_string()))?;
        let response = self
            .client
            .put(self.url()?)
            .bearer_auth(self.endpoint.token())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::read_body(response).await?;

        let merged = codec::decode_blob(&body, clock::now_ms())
            .map_err(|e| SyncError::Transport(e.to_string()))?
            .ok_or_else(|| SyncError::Transport("remote returned no merged state".to_string()))?;
        tracing::debug!(
            sync_id = self.endpoint.sync_id(),
            tasks = merged.tasks.len(),
            "pushed and merged"
        );
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

/// Failure a [`LoopbackRemote`] can be told to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// Every request is rejected as unauthorized.
    Unauthorized,
    /// Every request fails as if the network were down.
    Offline,
    /// Fetches succeed; pushes fail as if the connection dropped mid-sync.
    PushOffline,
}

#[derive(Debug, Default)]
struct LoopbackInner {
    blob: Option<AppState>,
    failure: Option<SimulatedFailure>,
    fixed_now: Option<u64>,
    fetches: usize,
    pushes: usize,
}

/// In-process [`BlobRemote`] that merges like the blob server.
///
/// Clones share the same blob, so several devices can sync through one
/// loopback remote.
#[derive(Debug, Clone, Default)]
pub struct LoopbackRemote {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackRemote {
    /// Creates an empty remote whose merges use a fixed `now`.
    #[must_use]
    pub fn at(now: u64) -> Self {
        let remote = Self::default();
        remote.inner.lock().fixed_now = Some(now);
        remote
    }

    /// Sets or clears the simulated failure mode.
    pub fn set_failure(&self, failure: Option<SimulatedFailure>) {
        self.inner.lock().failure = failure;
    }

    /// Sets the merge clock.
    pub fn set_now(&self, now: u64) {
        self.inner.lock().fixed_now = Some(now);
    }

    /// The blob currently held.
    #[must_use]
    pub fn blob(&self) -> Option<AppState> {
        self.inner.lock().blob.clone()
    }

    /// Number of fetches served.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.inner.lock().fetches
    }

    /// Number of pushes merged.
    #[must_use]
    pub fn pushes(&self) -> usize {
        self.inner.lock().pushes
    }
}

fn simulated(failure: Option<SimulatedFailure>, pushing: bool) -> Result<(), SyncError> {
    match failure {
        Some(SimulatedFailure::Unauthorized) => Err(SyncError::Unauthorized),
        Some(SimulatedFailure::Offline) => {
            Err(SyncError::Transport("simulated network failure".to_string()))
        }
        Some(SimulatedFailure::PushOffline) if pushing => {
            Err(SyncError::Transport("simulated push failure".to_string()))
        }
        Some(SimulatedFailure::PushOffline) | None => Ok(()),
    }
}

impl BlobRemote for LoopbackRemote {
    async fn fetch(&self) -> Result<Option<AppState>, SyncError> {
        let mut inner = self.inner.lock();
        simulated(inner.failure, false)?;
        inner.fetches += 1;
        Ok(inner.blob.clone())
    }

    async fn push_and_merge(&self, local: &AppState) -> Result<AppState, SyncError> {
        let mut inner = self.inner.lock();
        simulated(inner.failure, true)?;
        let now = inner.fixed_now.unwrap_or_else(clock::now_ms);
        let stored = inner.blob.take().unwrap_or_default();
        let merged = merge(&stored, local, now);
        inner.blob = Some(merged.clone());
        inner.pushes += 1;
        Ok(merged)
    }
}
