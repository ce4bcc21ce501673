//! Scribble blob server: stores and merges task list blobs per sync id.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8787
//! SCRIBBLE_AUTH_TOKEN=s3cret cargo run --bin scribble-server
//!
//! # Run on custom address, persisting blobs to disk
//! cargo run --bin scribble-server -- --bind 127.0.0.1:8080 --data-dir ./blobs
//! ```

use std::sync::Arc;

use clap::Parser;
use scribble_server::config::{ServerCliArgs, ServerConfig};
use scribble_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting scribble blob server");
    if config.auth_token.is_none() {
        tracing::warn!("no auth token configured; blob requests will be refused");
    }

    let state = match ServerState::from_config(&config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to open blob store");
            std::process::exit(1);
        }
    };

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "blob server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "blob server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start blob server");
            std::process::exit(1);
        }
    }
}
