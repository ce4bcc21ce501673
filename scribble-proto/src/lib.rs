//! Shared data model, normalization, and merge engine for Scribble.
//!
//! Both the blob server and device clients depend on this crate so that the
//! merge arithmetic is identical on every side of the wire.

pub mod clock;
pub mod codec;
pub mod merge;
pub mod normalize;
pub mod state;
pub mod task;

pub use merge::{TOMBSTONE_RETENTION_MS, merge, merge_values};
pub use state::{AppState, TaskTable, Tombstones};
pub use task::{Task, TaskId, TaskStatus};
