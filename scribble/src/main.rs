//! `scribble`: terminal task list that syncs across devices.
//!
//! Every mutating command persists locally and then runs an unforced sync,
//! which only reaches the network once per sync interval. `scribble sync`
//! forces an attempt. Configuration via CLI flags, environment variables,
//! or config file (`~/.config/scribble/config.toml`).
//!
//! ```bash
//! # Point this device at a blob server (generates a sync id)
//! scribble connect --base https://sync.example.com --token s3cret
//!
//! # Join an existing sync id from another device
//! scribble connect --base https://sync.example.com --token s3cret --sync-id <id>
//!
//! scribble add buy milk --group errands
//! scribble list
//! scribble done <id>
//! scribble sync --force
//!
//! # Stop syncing this device
//! scribble disconnect
//! ```

use std::path::Path;
use std::process::ExitCode;

use chrono::TimeZone;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use scribble::config::{CliArgs, ClientConfig, ConfigError};
use scribble::local::{LocalError, LocalState};
use scribble::store::{self, FileStore, KeyValueStore, StoreError, keys};
use scribble::sync::orchestrator::{SyncOptions, SyncOrchestrator};
use scribble::sync::remote::HttpBlobRemote;
use scribble::sync::{self, EndpointError, SyncConfigRecord, SyncEndpoint, SyncError, SyncReport};
use scribble_proto::{AppState, TaskId, TaskStatus, clock};

#[derive(Parser, Debug)]
#[command(name = "scribble", version, about = "Task list with multi-device sync")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Mutate(Mutation),

    /// Show tasks (the selected group by default).
    List {
        /// Show only this group.
        #[arg(short, long)]
        group: Option<String>,
        /// Show every group.
        #[arg(short, long, conflicts_with = "group")]
        all: bool,
    },

    /// Run a sync attempt now.
    Sync {
        /// Ignore the sync interval.
        #[arg(short, long)]
        force: bool,
        /// Replace local state with the remote copy before pushing.
        #[arg(long)]
        adopt_remote: bool,
    },

    /// Show local state and sync bookkeeping.
    Status,

    /// Save the endpoint given by `--base`, `--sync-id`, and `--token`
    /// for this device, then sync.
    Connect,

    /// Forget the endpoint saved by `connect`.
    Disconnect,
}

#[derive(Subcommand, Debug)]
enum Mutation {
    /// Add a task.
    Add {
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Group label.
        #[arg(short, long, default_value = "")]
        group: String,
    },
    /// Mark a task as completed.
    Done { id: TaskId },
    /// Mark a task as pending again.
    Undo { id: TaskId },
    /// Replace a task's text.
    Edit {
        id: TaskId,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Move a task to a group (empty to ungroup).
    Group { id: TaskId, group: String },
    /// Delete a task.
    Rm { id: TaskId },
    /// Rename a group on every task in it.
    RenameGroup { old: String, new: String },
    /// Select the group shown by `list` (omit to show all).
    SelectGroup { name: Option<String> },
    /// Set the user name.
    User { name: String },
}

/// Top-level command failures.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("connect needs --base")]
    MissingBase,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());
    tracing::debug!(?config, "configuration resolved");

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file logging that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) =
        file_path.and_then(|p| Some((p.parent()?, p.file_name()?.to_str()?)))
    else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), CommandError> {
    let now = clock::now_ms();
    let mut local = LocalState::load(FileStore::new(&config.state_file), now).await?;

    match command {
        Command::Mutate(mutation) => {
            apply(&mut local, mutation, now)?;
            local.persist().await?;

            let orchestrator = orchestrator(local.store(), config).await?;
            match orchestrator.run(&mut local, SyncOptions::default(), now).await {
                report @ (SyncReport::Failed(_) | SyncReport::LockBusy) => eprintln!("{report}"),
                _ => {}
            }
            Ok(())
        }
        Command::List { group, all } => {
            list(local.state(), group.as_deref(), all);
            Ok(())
        }
        Command::Sync {
            force,
            adopt_remote,
        } => {
            let orchestrator = orchestrator(local.store(), config).await?;
            let options = SyncOptions {
                force,
                adopt_remote,
            };
            finish_sync(orchestrator.run(&mut local, options, now).await)
        }
        Command::Status => status(&local, config, now).await,
        Command::Connect => {
            let base = config.base.as_deref().ok_or(CommandError::MissingBase)?;
            let sync_id = config
                .sync_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().simple().to_string());
            let endpoint =
                SyncEndpoint::new(base, &sync_id, config.token.as_deref().unwrap_or_default())?;
            sync::save_endpoint(local.store(), &endpoint).await?;

            println!("sync id: {}", endpoint.sync_id());
            tracing::info!(sync_id = endpoint.sync_id(), "endpoint saved");

            let orchestrator = orchestrator(local.store(), config).await?;
            let options = SyncOptions {
                force: true,
                adopt_remote: false,
            };
            finish_sync(orchestrator.run(&mut local, options, now).await)
        }
        Command::Disconnect => {
            if sync::forget_endpoint(local.store()).await? {
                tracing::info!("endpoint forgotten");
                println!("sync endpoint removed");
            } else {
                println!("no saved sync endpoint");
            }
            Ok(())
        }
    }
}

fn apply<S>(local: &mut LocalState<S>, mutation: Mutation, now: u64) -> Result<(), LocalError> {
    match mutation {
        Mutation::Add { text, group } => {
            let id = local.add_task(&text.join(" "), &group, now)?;
            println!("{id}");
        }
        Mutation::Done { id } => local.set_status(id, TaskStatus::Completed, now)?,
        Mutation::Undo { id } => local.set_status(id, TaskStatus::Pending, now)?,
        Mutation::Edit { id, text } => local.edit_text(id, &text.join(" "), now)?,
        Mutation::Group { id, group } => local.set_group(id, &group, now)?,
        Mutation::Rm { id } => local.delete_task(id, now)?,
        Mutation::RenameGroup { old, new } => {
            let moved = local.rename_group(&old, &new, now);
            println!("moved {moved} task(s)");
        }
        Mutation::SelectGroup { name } => local.select_group(name.as_deref().unwrap_or(""), now),
        Mutation::User { name } => local.set_user_name(&name, now),
    }
    Ok(())
}

/// Builds the orchestrator for the endpoint resolved from config and the
/// stored `sync_config` record.
async fn orchestrator<S: KeyValueStore>(
    store: &S,
    config: &ClientConfig,
) -> Result<SyncOrchestrator<HttpBlobRemote>, CommandError> {
    let stored = store.get(keys::SYNC_CONFIG).await?.and_then(|value| {
        serde_json::from_value::<SyncConfigRecord>(value)
            .inspect_err(|e| tracing::warn!(error = %e, "ignoring unreadable sync_config"))
            .ok()
    });
    let remote = config
        .endpoint(stored.as_ref())?
        .map(|endpoint| HttpBlobRemote::new(endpoint, config.request_timeout));
    Ok(SyncOrchestrator::new(remote, config.sync_settings()))
}

fn finish_sync(report: SyncReport) -> Result<(), CommandError> {
    let report = report.into_result()?;
    println!("{report}");
    Ok(())
}

fn list(state: &AppState, group: Option<&str>, all: bool) {
    let filter = if all {
        None
    } else {
        group.or_else(|| Some(state.selected_group.as_str()).filter(|g| !g.is_empty()))
    };

    let mut shown = 0_usize;
    for task in state
        .tasks
        .iter()
        .filter(|t| filter.is_none_or(|g| t.group == g))
    {
        let check = if task.is_completed() { "x" } else { " " };
        if task.group.is_empty() {
            println!("[{check}] {}  {}", task.task_id, task.text);
        } else {
            println!("[{check}] {}  {}  #{}", task.task_id, task.text, task.group);
        }
        shown += 1;
    }
    if shown == 0 {
        println!("no tasks");
    }
}

async fn status<S: KeyValueStore>(
    local: &LocalState<S>,
    config: &ClientConfig,
    now: u64,
) -> Result<(), CommandError> {
    let state = local.state();
    let store = local.store();
    let orchestrator = orchestrator(store, config).await?;

    println!("state file:    {}", config.state_file.display());
    println!("user:          {}", state.user_name);
    println!(
        "tasks:         {} ({} completed)",
        state.tasks.len(),
        state.tasks.iter().filter(|t| t.is_completed()).count()
    );
    println!("tombstones:    {}", state.tombstones.len());
    println!("groups:        {}", state.groups().join(", "));
    println!("selected:      {}", state.selected_group);
    println!("updated:       {}", format_millis(state.updated_at));
    println!("unsynced:      {}", local.is_dirty());

    match orchestrator.remote() {
        Some(remote) => {
            let endpoint = remote.endpoint();
            println!("remote:        {} ({})", endpoint.base(), endpoint.sync_id());
        }
        None => println!("remote:        not configured"),
    }

    let attempt = store::get_millis(store, keys::LAST_SYNC_ATTEMPT).await?;
    let success = store::get_millis(store, keys::LAST_SYNC_SUCCESS).await?;
    let lease = store::get_millis(store, keys::SYNC_LOCK_UNTIL).await?;
    println!("last attempt:  {}", format_millis(attempt));
    println!("last success:  {}", format_millis(success));
    println!("sync due:      {}", orchestrator.is_due(store, now).await?);
    if lease > now {
        println!("sync lease:    held until {}", format_millis(lease));
    }
    Ok(())
}

/// Formats epoch milliseconds in local time; `0` means never.
fn format_millis(ms: u64) -> String {
    if ms == 0 {
        return "never".to_string();
    }
    i64::try_from(ms)
        .ok()
        .and_then(|ms| chrono::Local.timestamp_millis_opt(ms).single())
        .map_or_else(
            || ms.to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
}
