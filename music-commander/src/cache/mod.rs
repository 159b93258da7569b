//! Local metadata cache
//!
//! A derivative SQLite database at `<repo>/.music-commander-cache.db`
//! holding one row per annex key, crate memberships, a freshness
//! sentinel, and an FTS5 mirror for full-text search. Safe to delete at
//! any time; the builder regenerates it from the metadata branch.

pub mod builder;
pub mod models;
pub mod store;

pub use builder::{build_cache, refresh_cache};
pub use models::{CacheState, CrateMembership, Track};
pub use store::{CacheStore, CACHE_DB_NAME};
