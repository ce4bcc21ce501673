//! Pure merge engine for task list states.
//!
//! Reconciles a stored state with an incoming one using per-task
//! last-writer-wins on [`Task::score`](crate::task::Task::score) and
//! tombstones that beat any copy scored at or before the deletion.
//!
//! Roles are fixed rather than positional: the *stored* side is the state
//! the merge is applied onto (the server's current blob), the *incoming*
//! side is the state being pushed. Equal task scores keep the stored copy;
//! equal state timestamps take metadata from the incoming side.
//!
//! The current time is a parameter so that results are reproducible.

use serde_json::Value;

use crate::clock::DAY_MS;
use crate::normalize;
use crate::state::{AppState, TaskTable, Tombstones};

/// Tombstones older than this are pruned at merge time (90 days).
pub const TOMBSTONE_RETENTION_MS: u64 = 90 * DAY_MS;

/// Merges two tombstone maps, keeping the later deletion per id.
#[must_use]
pub fn merge_tombstones(a: &Tombstones, b: &Tombstones) -> Tombstones {
    let mut out = a.clone();
    for (id, deleted_at) in b {
        let slot = out.entry(*id).or_insert(0);
        *slot = (*slot).max(*deleted_at);
    }
    out
}

/// Removes tombstones whose deletion is more than `retention_ms` before `now`.
///
/// Returns the number of entries removed.
pub fn prune_tombstones(tombstones: &mut Tombstones, now: u64, retention_ms: u64) -> usize {
    let before = tombstones.len();
    tombstones.retain(|_, deleted_at| now.saturating_sub(*deleted_at) <= retention_ms);
    before - tombstones.len()
}

/// Merges `incoming` onto `stored`.
///
/// 1. Tombstones: union, later deletion wins.
/// 2. Tasks: stored copies first, then incoming; a copy replaces another
///    only with a strictly greater score.
/// 3. Tasks whose tombstone is at or after their score are dropped.
/// 4. Tombstones past [`TOMBSTONE_RETENTION_MS`] are pruned.
/// 5. Metadata comes from the side with the newer `updated_at`.
/// 6. `updated_at` is the max of both sides and `now`.
#[must_use]
pub fn merge(stored: &AppState, incoming: &AppState, now: u64) -> AppState {
    let mut tombstones = merge_tombstones(&stored.tombstones, &incoming.tombstones);

    let mut table = TaskTable::new();
    for task in &stored.tasks {
        table.offer(task.clone(), stored.updated_at);
    }
    for task in &incoming.tasks {
        table.offer(task.clone(), incoming.updated_at);
    }
    table.suppress(&tombstones);

    prune_tombstones(&mut tombstones, now, TOMBSTONE_RETENTION_MS);

    let meta = if incoming.updated_at >= stored.updated_at {
        incoming
    } else {
        stored
    };

    AppState {
        tasks: table.into_tasks(),
        tombstones,
        selected_group: meta.selected_group.clone(),
        user_name: meta.user_name.clone(),
        updated_at: stored.updated_at.max(incoming.updated_at).max(now),
    }
}

/// Merges raw wire documents, normalizing each side first.
///
/// `stored` is `None` when nothing has been written for the sync id yet.
/// Never fails: unreadable input degrades to an empty state.
#[must_use]
pub fn merge_values(stored: Option<&Value>, incoming: &Value, now: u64) -> AppState {
    let stored = stored.map_or_else(AppState::default, |v| normalize::state_from_blob(v, now));
    let incoming = normalize::state_from_blob(incoming, now);
    merge(&stored, &incoming, now)
}
