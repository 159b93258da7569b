//! `cache` subcommands: build, refresh, delete.

use crate::cache::{build_cache, refresh_cache, store::delete_cache, CacheStore};
use crate::commands::{open_repo, require_metadata_branch, EXIT_SUCCESS};
use mc_common::{Result, RunContext};
use std::path::Path;
use tracing::info;

pub async fn run_build(_ctx: &RunContext, repo_root: &Path) -> Result<i32> {
    let (repo, store) = open_repo(repo_root).await?;
    require_metadata_branch(&repo).await?;

    let count = build_cache(&repo, &store).await?;
    println!("Cache built with {count} tracks");
    Ok(EXIT_SUCCESS)
}

pub async fn run_refresh(_ctx: &RunContext, repo_root: &Path) -> Result<i32> {
    let (repo, store) = open_repo(repo_root).await?;
    require_metadata_branch(&repo).await?;

    match refresh_cache(&repo, &store).await? {
        Some(updated) => println!("Cache refreshed: {updated} keys updated"),
        None => println!("Cache is current"),
    }
    Ok(EXIT_SUCCESS)
}

pub async fn run_delete(_ctx: &RunContext, repo_root: &Path) -> Result<i32> {
    if delete_cache(repo_root)? {
        println!("Cache deleted");
    } else {
        info!("no cache file to delete");
    }
    Ok(EXIT_SUCCESS)
}

pub async fn run_status(_ctx: &RunContext, repo_root: &Path) -> Result<i32> {
    let store = CacheStore::open_or_create(repo_root).await?;
    match store.state().await? {
        Some(state) => {
            println!(
                "tracks: {}  pointer: {}  updated: {}",
                state.track_count.unwrap_or(0),
                state.branch_pointer.as_deref().unwrap_or("-"),
                state.last_updated.as_deref().unwrap_or("-"),
            );
        }
        None => println!("Cache has not been built yet"),
    }
    Ok(EXIT_SUCCESS)
}
