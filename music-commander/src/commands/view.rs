//! `view` subcommand: create a symlink tree from search results.

use crate::cache::store::delete_cache;
use crate::cache::build_cache;
use crate::commands::{ensure_fresh_cache, open_repo, require_metadata_branch, EXIT_SUCCESS};
use crate::search::{execute_search, parse_query};
use crate::view::{cleanup_output_dir, create_symlink_tree, PathTemplate};
use mc_common::{Error, Result, RunContext};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ViewArgs {
    pub query: String,
    pub pattern: String,
    pub output: PathBuf,
    pub absolute: bool,
    pub rebuild_cache: bool,
    pub no_cleanup: bool,
    pub include_missing: bool,
}

pub async fn run(ctx: &RunContext, repo_root: &Path, args: ViewArgs) -> Result<i32> {
    let ast = parse_query(&args.query)
        .map_err(|e| Error::Parse(format!("invalid search query: {e}")))?;
    let template = PathTemplate::compile(&args.pattern)?;

    if args.rebuild_cache {
        delete_cache(repo_root)?;
    }
    let (repo, store) = open_repo(repo_root).await?;
    require_metadata_branch(&repo).await?;
    if args.rebuild_cache {
        build_cache(&repo, &store).await?;
    } else {
        ensure_fresh_cache(&repo, &store).await?;
    }

    let mut tracks = execute_search(store.pool(), &ast, None, None).await?;
    if !args.include_missing {
        tracks.retain(|t| t.present);
    }
    if tracks.is_empty() {
        if !ctx.quiet() {
            println!("No results for: {}", args.query);
        }
        return Ok(EXIT_SUCCESS);
    }

    let keys: Vec<String> = tracks.iter().map(|t| t.key.clone()).collect();
    let crates_by_key = store.load_crates(&keys).await?;

    if !args.no_cleanup {
        let removed = cleanup_output_dir(&args.output)?;
        if removed > 0 {
            info!("removed {removed} old symlinks");
        }
    }

    let (created, duplicates) = create_symlink_tree(
        &tracks,
        &crates_by_key,
        &template,
        &args.output,
        repo_root,
        args.absolute,
    )?;

    if !ctx.quiet() {
        if duplicates > 0 {
            println!("Created {created} symlinks ({duplicates} renamed duplicates)");
        } else {
            println!("Created {created} symlinks");
        }
    }
    Ok(EXIT_SUCCESS)
}
