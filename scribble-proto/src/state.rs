//! The synchronizable record: tasks, tombstones, and whole-state metadata.

use std::collections::BTreeMap;

use crate::task::{Task, TaskId};

/// Deletion events keyed by task id, valued by the deletion time in ms.
pub type Tombstones = BTreeMap<TaskId, u64>;

/// Full synchronizable state for one sync identifier.
///
/// `tasks` is kept sorted by id with at most one entry per id; use
/// [`TaskTable`] to build it from unordered or duplicated input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    /// Live tasks, ascending by id.
    pub tasks: Vec<Task>,
    /// Deletion events that suppress tasks with a lower or equal score.
    pub tombstones: Tombstones,
    /// Group currently selected in the view (whole-state LWW).
    pub selected_group: String,
    /// Display name of the user (whole-state LWW).
    pub user_name: String,
    /// Millisecond timestamp of the last change to this state.
    pub updated_at: u64,
}

impl AppState {
    /// Returns the task with the given id, if present.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks
            .binary_search_by_key(&id, |t| t.task_id)
            .ok()
            .map(|idx| &self.tasks[idx])
    }

    /// Returns a mutable handle to the task with the given id, if present.
    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks
            .binary_search_by_key(&id, |t| t.task_id)
            .ok()
            .map(|idx| &mut self.tasks[idx])
    }

    /// Inserts or replaces a task, keeping `tasks` sorted by id.
    pub fn upsert(&mut self, task: Task) {
        match self.tasks.binary_search_by_key(&task.task_id, |t| t.task_id) {
            Ok(idx) => self.tasks[idx] = task,
            Err(idx) => self.tasks.insert(idx, task),
        }
    }

    /// Removes and returns the task with the given id.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks
            .binary_search_by_key(&id, |t| t.task_id)
            .ok()
            .map(|idx| self.tasks.remove(idx))
    }

    /// Drops every task whose tombstone is at or after its score.
    ///
    /// Returns the number of tasks removed.
    pub fn suppress_tombstoned(&mut self) -> usize {
        let before = self.tasks.len();
        let updated_at = self.updated_at;
        let tombstones = &self.tombstones;
        self.tasks
            .retain(|t| !is_suppressed(t, tombstones.get(&t.task_id).copied(), updated_at));
        before - self.tasks.len()
    }

    /// Distinct non-empty group labels in first-seen order.
    #[must_use]
    pub fn groups(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for task in &self.tasks {
            if !task.group.is_empty() && !out.contains(&task.group.as_str()) {
                out.push(&task.group);
            }
        }
        out
    }
}

/// Whether a tombstone at `deleted_at` suppresses `task`.
fn is_suppressed(task: &Task, deleted_at: Option<u64>, state_updated_at: u64) -> bool {
    deleted_at.is_some_and(|d| d >= task.score(state_updated_at))
}

/// Accumulator that keeps, per task id, the copy with the highest score.
///
/// Offers are processed in call order; a later copy replaces an earlier one
/// only when its score is strictly greater, so equal scores keep whichever
/// copy was offered first.
#[derive(Debug, Default)]
pub struct TaskTable {
    entries: BTreeMap<TaskId, (Task, u64)>,
}

impl TaskTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a task owned by a state stamped `state_updated_at`.
    ///
    /// Returns `true` if the task was retained.
    pub fn offer(&mut self, task: Task, state_updated_at: u64) -> bool {
        let score = task.score(state_updated_at);
        match self.entries.get(&task.task_id) {
            Some((_, existing)) if *existing >= score => false,
            _ => {
                self.entries.insert(task.task_id, (task, score));
                true
            }
        }
    }

    /// Drops every retained task whose tombstone is at or after its score.
    pub fn suppress(&mut self, tombstones: &Tombstones) {
        self.entries.retain(|id, (_, score)| {
            tombstones
                .get(id)
                .is_none_or(|deleted_at| *deleted_at < *score)
        });
    }

    /// Number of retained tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no task is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the table, yielding tasks ascending by id.
    #[must_use]
    pub fn into_tasks(self) -> Vec<Task> {
        self.entries.into_values().map(|(task, _)| task).collect()
    }
}
