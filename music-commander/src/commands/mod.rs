//! Command adapters: thin glue between the clap surface and the core
//! modules, mapping outcomes to process exit codes.

pub mod cache;
pub mod check;
pub mod export;
pub mod search;
pub mod view;

use crate::annex::repo::{is_annexed, GitAnnexRepo};
use crate::annex::MetadataSource;
use crate::cache::{refresh_cache, CacheStore};
use crate::search::{execute_search, parse_query};
use mc_common::{Error, Result, RunContext};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Shared exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
pub const EXIT_CACHE_ERROR: i32 = 2;
pub const EXIT_NO_REPO: i32 = 3;

/// Map an error to the command exit code contract.
pub fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::NotGitRepo(_) | Error::NotAnnexRepo(_) | Error::InvalidRevision(_) => EXIT_NO_REPO,
        Error::Config(_) => EXIT_NO_REPO,
        Error::Parse(_) | Error::Template(_) => EXIT_CACHE_ERROR,
        Error::Cancelled => EXIT_PARTIAL_FAILURE,
        _ => EXIT_CACHE_ERROR,
    }
}

/// Open the repository and its cache store together.
pub async fn open_repo(repo_root: &Path) -> Result<(GitAnnexRepo, CacheStore)> {
    let repo = GitAnnexRepo::open(repo_root).await?;
    let store = CacheStore::open_or_create(repo_root).await?;
    Ok((repo, store))
}

/// Refresh the cache before querying, logging what changed.
pub async fn ensure_fresh_cache(repo: &GitAnnexRepo, store: &CacheStore) -> Result<()> {
    match refresh_cache(repo, store).await? {
        Some(updated) if updated > 0 => info!("cache refreshed: {updated} keys updated"),
        _ => {}
    }
    Ok(())
}

/// Annexed files under a directory, sorted for determinism.
fn annexed_files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| is_annexed(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Resolve command arguments into absolute file paths.
///
/// Each argument is tried as a repo-relative path first (file or
/// directory); when none resolve, the arguments are joined into one
/// search query against the cache. Empty arguments mean every cached
/// track.
pub async fn resolve_args_to_files(
    _ctx: &RunContext,
    repo: &GitAnnexRepo,
    store: &CacheStore,
    args: &[String],
) -> Result<Vec<PathBuf>> {
    let repo_root = repo.repo_path();

    if !args.is_empty() {
        let as_paths: Vec<PathBuf> = args
            .iter()
            .map(|arg| repo_root.join(arg))
            .collect();
        if as_paths.iter().all(|p| p.exists() || p.is_symlink()) {
            let mut files = Vec::new();
            for path in as_paths {
                if path.is_dir() {
                    files.extend(annexed_files_under(&path));
                } else {
                    files.push(path);
                }
            }
            return Ok(files);
        }
    }

    // Fall through to a cache search.
    ensure_fresh_cache(repo, store).await?;
    let query = args.join(" ");
    let ast = parse_query(&query).map_err(|e| Error::Parse(e.to_string()))?;
    let tracks = execute_search(store.pool(), &ast, None, None).await?;
    Ok(tracks
        .into_iter()
        .filter_map(|t| t.file)
        .map(|f| repo_root.join(f))
        .collect())
}

/// Validate that the metadata branch exists before cache operations,
/// surfacing the not-initialized hint early.
pub async fn require_metadata_branch(repo: &GitAnnexRepo) -> Result<()> {
    if repo.current_branch_pointer().await?.is_none() {
        return Err(Error::NotAnnexRepo(repo.repo_path().to_path_buf()));
    }
    Ok(())
}
