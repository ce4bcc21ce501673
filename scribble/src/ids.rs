//! Task id generation.
//!
//! Ids are creation timestamps in ms, bumped past the previous id so that
//! two tasks created in the same millisecond still get distinct,
//! increasing ids. The last id is persisted by
//! [`LocalState::persist`](crate::local::LocalState::persist) so the
//! sequence also survives restarts.

use std::num::NonZeroU64;

use scribble_proto::TaskId;

/// Strictly increasing task id source for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskIdGenerator {
    last: u64,
}

impl TaskIdGenerator {
    /// Resumes a sequence after `last`.
    #[must_use]
    pub const fn new(last: u64) -> Self {
        Self { last }
    }

    /// The most recently issued id, `0` if none.
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.last
    }

    /// Issues the next id: `max(now, last + 1)`.
    pub fn next_id(&mut self, now: u64) -> TaskId {
        let bumped = NonZeroU64::MIN.saturating_add(self.last);
        let raw = NonZeroU64::new(now).map_or(bumped, |now| now.max(bumped));
        self.last = raw.get();
        TaskId::from(raw)
    }
}
