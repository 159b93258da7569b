//! # music-commander common library
//!
//! Shared code for the music-commander crates:
//! - Error type and result alias
//! - Configuration loading and repository resolution
//! - Run context (verbosity, cancellation)
//! - Timestamp utilities

pub mod config;
pub mod context;
pub mod error;
pub mod time;

pub use context::RunContext;
pub use error::{Error, Result};
