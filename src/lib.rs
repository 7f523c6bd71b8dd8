//! playlist-dl library
//!
//! Resolves a playlist, picks streams under a height ceiling, fetches and
//! merges each item into one file, and reports per-item outcomes.

pub mod core;
pub mod error;
pub mod server;
pub mod storage;
pub mod types;
pub mod ui;
pub mod utils;
