//! music-commander core library
//!
//! Manages a git-annex music collection: a local SQLite metadata cache
//! with full-text search, a Mixxx-compatible query language, parallel
//! integrity checking, parallel export/transcoding, and symlink views.
//!
//! The binary in `main.rs` is a thin clap layer over these modules;
//! integration tests drive them directly.

pub mod annex;
pub mod cache;
pub mod check;
pub mod commands;
pub mod export;
pub mod jobs;
pub mod search;
pub mod view;

pub use mc_common::{Error, Result, RunContext};
