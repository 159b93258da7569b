//! Common error types for music-commander

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for music-commander operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across music-commander crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not a git repository: {0}")]
    NotGitRepo(PathBuf),

    #[error("Not a git-annex repository: {0}")]
    NotAnnexRepo(PathBuf),

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying SQLite database reports on-disk corruption.
    ///
    /// The cache database is a derivative, so corruption is recovered by
    /// deleting and rebuilding it once.
    pub fn is_cache_corruption(&self) -> bool {
        match self {
            Error::Database(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("malformed") || msg.contains("not a database") || msg.contains("corrupt")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_detection_matches_backend_messages() {
        let err = Error::Database(sqlx::Error::Protocol(
            "database disk image is malformed".into(),
        ));
        assert!(err.is_cache_corruption());

        let err = Error::Database(sqlx::Error::Protocol("file is not a database".into()));
        assert!(err.is_cache_corruption());

        let err = Error::Config("missing repo".into());
        assert!(!err.is_cache_corruption());
    }
}
