//! HTTP front end of the blob server.
//!
//! Routes:
//! - `GET /` health check
//! - `GET /v1/blob/{sync_id}` returns the stored blob or `null`
//! - `PUT /v1/blob/{sync_id}` merges the body into the stored blob and
//!   returns the merged result
//!
//! Any `OPTIONS` request answers 204 without authentication. Every response
//! carries permissive CORS headers. Blob routes require the configured token,
//! either as `Authorization: Bearer <token>` or `X-Auth-Token: <token>`.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde_json::{Value, json};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::store::BlobStore;

/// Default maximum request body size in bytes (1 MiB).
const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Longest accepted sync id.
const MAX_SYNC_ID_LEN: usize = 100;

const X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");

/// Shared server state: the blob store and the expected token.
pub struct ServerState {
    /// Blob storage.
    pub store: BlobStore,
    auth_token: Option<String>,
    max_body_size: usize,
}

impl ServerState {
    /// Creates a state with an in-memory store and the default body limit.
    ///
    /// `auth_token` of `None` makes every blob request fail with
    /// `server_not_configured`.
    #[must_use]
    pub fn new(auth_token: Option<String>) -> Self {
        Self::with_store(auth_token, BlobStore::new(), DEFAULT_MAX_BODY_SIZE)
    }

    /// Creates a state around an existing store.
    #[must_use]
    pub fn with_store(auth_token: Option<String>, store: BlobStore, max_body_size: usize) -> Self {
        Self {
            store,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            max_body_size,
        }
    }

    /// Builds the state described by a resolved [`ServerConfig`], opening the
    /// data directory when one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be opened.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, crate::store::StoreError> {
        let store = match &config.data_dir {
            Some(dir) => BlobStore::open(dir).await?,
            None => BlobStore::new(),
        };
        Ok(Self::with_store(
            config.auth_token.clone(),
            store,
            config.max_body_size,
        ))
    }
}

/// Builds the router with CORS headers, request tracing, and the body limit.
#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    let max_body_size = state.max_body_size;
    Router::new()
        .route("/", any(health_handler))
        .route("/v1/blob/{sync_id}", any(blob_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,PUT,OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type,authorization,x-auth-token"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the blob server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    auth_token: Option<String>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new(auth_token))).await
}

/// Starts the blob server with a pre-built [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "blob server error");
        }
    });

    Ok((bound_addr, handle))
}

fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

fn blob_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

async fn health_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    Json(json!({ "ok": true, "msg": "use /v1/blob/<syncId>" })).into_response()
}

async fn not_found_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    error_response(StatusCode::NOT_FOUND, "not_found")
}

/// Returns `true` for 1 to 100 ASCII letters, digits, `_` or `-`.
#[must_use]
pub fn is_valid_sync_id(sync_id: &str) -> bool {
    (1..=MAX_SYNC_ID_LEN).contains(&sync_id.len())
        && sync_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Checks request credentials against the configured token.
fn check_auth(expected: Option<&str>, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = expected else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "server_not_configured",
                "hint": "Set AUTH_TOKEN secret",
            })),
        )
            .into_response());
    };

    let header_str = |name: &HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    let bearer_ok = header_str(&header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == expected);
    let token_ok = header_str(&X_AUTH_TOKEN).is_some_and(|t| t == expected);

    if bearer_ok || token_ok {
        Ok(())
    } else {
        Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized"))
    }
}

async fn blob_handler(
    State(state): State<Arc<ServerState>>,
    Path(sync_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    if !is_valid_sync_id(&sync_id) {
        return error_response(StatusCode::NOT_FOUND, "not_found");
    }
    if let Err(rejection) = check_auth(state.auth_token.as_deref(), &headers) {
        tracing::debug!(sync_id, "rejected blob request");
        return rejection;
    }

    match method {
        Method::GET => {
            let raw = state.store.get(&sync_id).await;
            blob_response(raw.unwrap_or_else(|| "null".to_string()))
        }
        Method::PUT => {
            let Ok(incoming) = serde_json::from_slice::<Value>(&body) else {
                return error_response(StatusCode::BAD_REQUEST, "invalid_json");
            };
            let now = scribble_proto::clock::now_ms();
            match state.store.merge_put(&sync_id, &incoming, now).await {
                Ok(merged) => {
                    tracing::info!(sync_id, bytes = merged.len(), "merged push");
                    blob_response(merged)
                }
                Err(e) => {
                    tracing::error!(sync_id, error = %e, "failed to store merged blob");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_failed")
                }
            }
        }
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
    }
}
