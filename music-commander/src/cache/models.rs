//! Cache row types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cached metadata for a single annexed track.
///
/// Scalar columns mirror the first value of the corresponding
/// multi-value slot in the metadata snapshot; `crate` memberships live
/// in [`CrateMembership`] rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Track {
    /// Content-hash annex key (immutable primary key).
    pub key: String,
    /// Repo-relative path, None when the key is only referenced by
    /// history and absent from the current tree.
    pub file: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub bpm: Option<f64>,
    pub rating: Option<i64>,
    pub key_musical: Option<String>,
    pub year: Option<String>,
    pub tracknumber: Option<String>,
    pub comment: Option<String>,
    pub color: Option<String>,
    /// True iff the object-store blob was locally materialized at the
    /// last refresh.
    pub present: bool,
}

/// Multi-value crate membership, one row per (key, crate) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CrateMembership {
    pub key: String,
    #[sqlx(rename = "crate")]
    #[serde(rename = "crate")]
    pub crate_name: String,
}

/// Singleton freshness sentinel (id = 1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CacheState {
    /// Metadata branch commit at the last successful build or patch.
    pub branch_pointer: Option<String>,
    /// RFC 3339 timestamp of the last successful build or patch.
    pub last_updated: Option<String>,
    pub track_count: Option<i64>,
}
