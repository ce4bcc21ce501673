//! Scribble blob server library.
//!
//! Exposes the HTTP blob server for use in tests and embedding. The server
//! stores one JSON blob per sync id and merges every push into it with the
//! shared `scribble-proto` merge engine.

pub mod config;
pub mod server;
pub mod store;
