//! Device-local task list state.
//!
//! [`LocalState`] owns the in-memory [`AppState`] for one process together
//! with the dirty flag and the task id sequence. Mutations are synchronous
//! and only touch memory; [`LocalState::persist`] writes everything back to
//! the [`KeyValueStore`].
//!
//! Every mutation takes a stamp `max(now, updated_at + 1)` so that the
//! state timestamp strictly increases even when the clock stalls or steps
//! backwards, then marks the state dirty.

use serde_json::Value;

use scribble_proto::codec::{self, CodecError};
use scribble_proto::{AppState, Task, TaskId, TaskStatus};

use crate::ids::TaskIdGenerator;
use crate::migrate;
use crate::store::{self, KeyValueStore, StoreError, keys};

/// Errors returned by local state operations.
#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    /// No live task has the given id.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// Task text was empty after trimming.
    #[error("task text cannot be empty")]
    EmptyText,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The state could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// The task list of one device plus its unpushed-changes flag.
#[derive(Debug)]
pub struct LocalState<S> {
    store: S,
    state: AppState,
    dirty: bool,
    ids: TaskIdGenerator,
}

impl<S: KeyValueStore> LocalState<S> {
    /// Loads local state from `store`, migrating a legacy layout first.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::Store`] if the store cannot be read, or the
    /// migrated record cannot be written.
    pub async fn load(store: S, now: u64) -> Result<Self, LocalError> {
        migrate::migrate_legacy(&store, now).await?;

        let state = store
            .get(keys::STATE)
            .await?
            .map(|record| codec::record_from_value(&record, now))
            .unwrap_or_default();
        let dirty = store::get_flag(&store, keys::DIRTY).await?;
        let last_id = store::get_millis(&store, keys::LAST_TASK_ID).await?;

        tracing::debug!(
            tasks = state.tasks.len(),
            dirty,
            updated_at = state.updated_at,
            "loaded local state"
        );
        Ok(Self {
            store,
            state,
            dirty,
            ids: TaskIdGenerator::new(last_id),
        })
    }

    /// Writes the state record, dirty flag, and id sequence to the store.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError`] if encoding or any store write fails.
    pub async fn persist(&self) -> Result<(), LocalError> {
        self.store
            .set(keys::STATE, codec::record_to_value(&self.state)?)
            .await?;
        self.store.set(keys::DIRTY, Value::Bool(self.dirty)).await?;
        self.store
            .set(keys::LAST_TASK_ID, Value::from(self.ids.last()))
            .await?;
        Ok(())
    }
}

impl<S> LocalState<S> {
    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns `true` if there are changes not yet confirmed by the remote.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag after the remote confirmed a push.
    pub const fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Replaces the state with `remote`, dropping tasks its own tombstones
    /// cover. The dirty flag is left unchanged.
    pub fn adopt(&mut self, remote: AppState) {
        self.state = remote;
        let dropped = self.state.suppress_tombstoned();
        if dropped > 0 {
            tracing::debug!(dropped, "adopted state contained tombstoned tasks");
        }
    }

    /// Bumps the state timestamp past `floor` and marks dirty.
    fn stamp(&mut self, now: u64, floor: u64) -> u64 {
        let stamp = now
            .max(self.state.updated_at.saturating_add(1))
            .max(floor);
        self.state.updated_at = stamp;
        self.dirty = true;
        stamp
    }

    /// Applies `edit` to a task and restamps it so the edit outscores every
    /// earlier copy of the task.
    fn touch_task(
        &mut self,
        id: TaskId,
        now: u64,
        edit: impl FnOnce(&mut Task),
    ) -> Result<(), LocalError> {
        let state_updated_at = self.state.updated_at;
        let previous = self
            .state
            .task(id)
            .ok_or(LocalError::TaskNotFound(id))?
            .score(state_updated_at);

        let stamp = self.stamp(now, previous.saturating_add(1));
        if let Some(task) = self.state.task_mut(id) {
            edit(task);
            task.task_updated_at = stamp;
        }
        Ok(())
    }

    /// Creates a task and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::EmptyText`] if `text` is blank.
    pub fn add_task(&mut self, text: &str, group: &str, now: u64) -> Result<TaskId, LocalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LocalError::EmptyText);
        }

        let id = self.ids.next_id(now);
        let stamp = self.stamp(now, 0);
        let mut task = Task::new(id, text, group.trim());
        task.task_updated_at = stamp;
        self.state.upsert(task);

        tracing::debug!(task_id = %id, "added task");
        Ok(id)
    }

    /// Sets a task's completion state.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::TaskNotFound`] for an unknown id.
    pub fn set_status(&mut self, id: TaskId, status: TaskStatus, now: u64) -> Result<(), LocalError> {
        self.touch_task(id, now, |task| task.status = status)
    }

    /// Replaces a task's text.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::EmptyText`] if `text` is blank, or
    /// [`LocalError::TaskNotFound`] for an unknown id.
    pub fn edit_text(&mut self, id: TaskId, text: &str, now: u64) -> Result<(), LocalError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LocalError::EmptyText);
        }
        self.touch_task(id, now, |task| task.text = text.to_string())
    }

    /// Moves a task to another group; an empty group ungroups it.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::TaskNotFound`] for an unknown id.
    pub fn set_group(&mut self, id: TaskId, group: &str, now: u64) -> Result<(), LocalError> {
        let group = group.trim();
        self.touch_task(id, now, |task| task.group = group.to_string())
    }

    /// Deletes a task and records its tombstone.
    ///
    /// The tombstone is never earlier than the task's score, so the deletion
    /// wins against every copy of the task seen so far.
    ///
    /// # Errors
    ///
    /// Returns [`LocalError::TaskNotFound`] for an unknown id.
    pub fn delete_task(&mut self, id: TaskId, now: u64) -> Result<(), LocalError> {
        let state_updated_at = self.state.updated_at;
        let score = self
            .state
            .task(id)
            .ok_or(LocalError::TaskNotFound(id))?
            .score(state_updated_at);

        let stamp = self.stamp(now, score);
        self.state.remove(id);
        let slot = self.state.tombstones.entry(id).or_insert(0);
        *slot = (*slot).max(stamp);

        tracing::debug!(task_id = %id, deleted_at = stamp, "deleted task");
        Ok(())
    }

    /// Retags every task in group `old` as `new`.
    ///
    /// Returns the number of tasks moved. The selected group follows the
    /// rename. Nothing is stamped when no task or selection matched.
    pub fn rename_group(&mut self, old: &str, new: &str, now: u64) -> usize {
        let old = old.trim();
        let new = new.trim();
        if old == new {
            return 0;
        }

        let state_updated_at = self.state.updated_at;
        let matching: Vec<(TaskId, u64)> = self
            .state
            .tasks
            .iter()
            .filter(|t| t.group == old)
            .map(|t| (t.task_id, t.score(state_updated_at)))
            .collect();
        let selection_moves = self.state.selected_group == old;
        if matching.is_empty() && !selection_moves {
            return 0;
        }

        let floor = matching.iter().map(|(_, score)| score.saturating_add(1)).max().unwrap_or(0);
        let stamp = self.stamp(now, floor);
        for (id, _) in &matching {
            if let Some(task) = self.state.task_mut(*id) {
                task.group = new.to_string();
                task.task_updated_at = stamp;
            }
        }
        if selection_moves {
            self.state.selected_group = new.to_string();
        }
        matching.len()
    }

    /// Sets the group shown in the task view.
    pub fn select_group(&mut self, name: &str, now: u64) {
        self.stamp(now, 0);
        self.state.selected_group = name.trim().to_string();
    }

    /// Sets the user's display name.
    pub fn set_user_name(&mut self, name: &str, now: u64) {
        self.stamp(now, 0);
        self.state.user_name = name.to_string();
    }
}
