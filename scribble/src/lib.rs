//! Scribble client library: local task state and multi-device sync.

pub mod config;
pub mod ids;
pub mod local;
pub mod migrate;
pub mod store;
pub mod sync;
