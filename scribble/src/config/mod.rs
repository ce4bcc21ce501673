//! Configuration system for the Scribble client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/scribble/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.
//!
//! Endpoint values resolved here take precedence over the `sync_config`
//! record kept in the local store by `scribble connect`.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::orchestrator::{DEFAULT_SYNC_INTERVAL_MS, SyncSettings};
use crate::sync::lease::DEFAULT_LEASE_TTL_MS;
use crate::sync::remote::DEFAULT_REQUEST_TIMEOUT;
use crate::sync::{EndpointError, SyncConfigRecord, SyncEndpoint};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    sync: SyncFileConfig,
    logging: LoggingFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    state_file: Option<PathBuf>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    base: Option<String>,
    sync_id: Option<String>,
    token: Option<String>,
    sync_interval_secs: Option<u64>,
    lease_ttl_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[logging]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LoggingFileConfig {
    level: Option<String>,
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    // -- Storage --
    /// JSON file holding the local key/value store.
    pub state_file: PathBuf,

    // -- Sync --
    /// Blob server base URL.
    pub base: Option<String>,
    /// Sync identifier shared by the user's devices.
    pub sync_id: Option<String>,
    /// Bearer token for the blob server.
    pub token: Option<String>,
    /// Minimum time between unforced sync attempts.
    pub sync_interval: Duration,
    /// Sync lease lifetime.
    pub lease_ttl: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    // -- Logging --
    /// Log level filter string.
    pub log_level: String,
    /// Log file; logs go to stderr when unset.
    pub log_file: Option<PathBuf>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("state_file", &self.state_file)
            .field("base", &self.base)
            .field("sync_id", &self.sync_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("sync_interval", &self.sync_interval)
            .field("lease_ttl", &self.lease_ttl)
            .field("request_timeout", &self.request_timeout)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            base: None,
            sync_id: None,
            token: None,
            sync_interval: Duration::from_millis(DEFAULT_SYNC_INTERVAL_MS),
            lease_ttl: Duration::from_millis(DEFAULT_LEASE_TTL_MS),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_level: "warn".to_string(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/scribble/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            state_file: cli
                .state_file
                .clone()
                .or_else(|| file.storage.state_file.clone())
                .unwrap_or(defaults.state_file),
            base: cli.base.clone().or_else(|| file.sync.base.clone()),
            sync_id: cli.sync_id.clone().or_else(|| file.sync.sync_id.clone()),
            token: cli.token.clone().or_else(|| file.sync.token.clone()),
            sync_interval: file
                .sync
                .sync_interval_secs
                .map_or(defaults.sync_interval, Duration::from_secs),
            lease_ttl: file
                .sync
                .lease_ttl_secs
                .map_or(defaults.lease_ttl, Duration::from_secs),
            request_timeout: file
                .sync
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.logging.level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli.log_file.clone().or_else(|| file.logging.file.clone()),
        }
    }

    /// Timing settings for the sync orchestrator.
    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            interval_ms: u64::try_from(self.sync_interval.as_millis()).unwrap_or(u64::MAX),
            lease_ttl_ms: u64::try_from(self.lease_ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Resolves the sync endpoint, letting configured values override the
    /// `stored` record field by field.
    ///
    /// Returns `Ok(None)` if no base URL or sync id is known.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the resulting values are invalid.
    pub fn endpoint(
        &self,
        stored: Option<&SyncConfigRecord>,
    ) -> Result<Option<SyncEndpoint>, EndpointError> {
        let pick = |configured: &Option<String>, stored: Option<&String>| {
            configured
                .clone()
                .or_else(|| stored.cloned())
                .filter(|v| !v.trim().is_empty())
        };

        let base = pick(&self.base, stored.map(|s| &s.base));
        let sync_id = pick(&self.sync_id, stored.map(|s| &s.sync_id));
        let token = pick(&self.token, stored.map(|s| &s.token)).unwrap_or_default();

        match (base, sync_id) {
            (Some(base), Some(sync_id)) => SyncEndpoint::new(&base, &sync_id, &token).map(Some),
            _ => Ok(None),
        }
    }
}

/// Global CLI arguments shared by every subcommand.
///
/// Environment variables are supported via `env` attributes.
#[derive(clap::Args, Debug, Default)]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/scribble/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Local state file (default: `<data dir>/scribble/state.json`).
    #[arg(long, global = true, env = "SCRIBBLE_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Blob server base URL.
    #[arg(long, global = true, env = "SCRIBBLE_BASE")]
    pub base: Option<String>,

    /// Sync identifier.
    #[arg(long, global = true, env = "SCRIBBLE_SYNC_ID")]
    pub sync_id: Option<String>,

    /// Blob server token.
    #[arg(long, global = true, env = "SCRIBBLE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "SCRIBBLE_LOG")]
    pub log_level: Option<String>,

    /// Path to log file (default: stderr).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Default location of the local state file.
fn default_state_file() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("scribble-state.json"),
        |dir| dir.join("scribble").join("state.json"),
    )
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("scribble").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
