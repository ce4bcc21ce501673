//! Task model shared by clients and the blob server.
//!
//! A [`Task`] is the unit of last-writer-wins reconciliation: two copies of
//! the same [`TaskId`] are compared by [`Task::score`] and the higher score
//! survives a merge as a whole record.

use serde::{Deserialize, Serialize};

/// Identifier of a task.
///
/// Ids are positive millisecond timestamps minted on the device that
/// created the task, so they double as the creation time and as the
/// default sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id. Returns `None` for zero, which is never a valid id.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<std::num::NonZeroU64> for TaskId {
    fn from(raw: std::num::NonZeroU64) -> Self {
        Self(raw.get())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: std::num::NonZeroU64 = s.trim().parse()?;
        Ok(Self(raw.get()))
    }
}

/// Completion state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not done yet.
    #[default]
    Pending,
    /// Checked off.
    Completed,
}

impl TaskStatus {
    /// Coerces a wire string: only the exact literal `completed` is completed.
    #[must_use]
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("completed") => Self::Completed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// A single entry in the task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Primary key and creation time.
    pub task_id: TaskId,
    /// Trimmed, non-empty task text (`task` on the wire).
    #[serde(rename = "task")]
    pub text: String,
    /// Trimmed group label; empty means ungrouped.
    #[serde(default)]
    pub group: String,
    /// Completion state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Millisecond timestamp of the last change to any field of this task.
    #[serde(default)]
    pub task_updated_at: u64,
}

impl Task {
    /// Builds a freshly created pending task stamped with its own id.
    #[must_use]
    pub fn new(task_id: TaskId, text: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            task_id,
            text: text.into(),
            group: group.into(),
            status: TaskStatus::Pending,
            task_updated_at: task_id.get(),
        }
    }

    /// Last-writer-wins comparison key.
    ///
    /// The task's own update stamp when set, else the owning state's
    /// `updated_at`, else the id itself.
    #[must_use]
    pub const fn score(&self, state_updated_at: u64) -> u64 {
        if self.task_updated_at > 0 {
            self.task_updated_at
        } else if state_updated_at > 0 {
            state_updated_at
        } else {
            self.task_id.get()
        }
    }

    /// Returns `true` once the task is checked off.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
