//! `search` subcommand: query the cache and print results.

use crate::cache::store::delete_cache;
use crate::cache::{build_cache, Track};
use crate::commands::{ensure_fresh_cache, open_repo, require_metadata_branch, EXIT_SUCCESS};
use crate::search::{execute_search, parse_query, Field, SortSpec};
use mc_common::{Error, Result, RunContext};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Output format for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Paths,
    Json,
}

#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub query: String,
    pub format: OutputFormat,
    pub limit: Option<i64>,
    /// Column name, optionally `-` prefixed for descending.
    pub sort: Option<String>,
    pub rebuild_cache: bool,
}

fn parse_sort(spec: &str) -> Result<SortSpec> {
    let (descending, name) = match spec.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let field = Field::parse(name)
        .filter(|f| *f != Field::Crate)
        .ok_or_else(|| Error::Parse(format!("unknown sort column '{name}'")))?;
    Ok(SortSpec { field, descending })
}

pub async fn run(ctx: &RunContext, repo_root: &Path, args: SearchArgs) -> Result<i32> {
    let ast = parse_query(&args.query)
        .map_err(|e| Error::Parse(format!("invalid search query: {e}")))?;
    let sort = args.sort.as_deref().map(parse_sort).transpose()?;

    if args.rebuild_cache {
        delete_cache(repo_root)?;
    }
    let (repo, store) = open_repo(repo_root).await?;
    require_metadata_branch(&repo).await?;

    if args.rebuild_cache {
        let count = build_cache(&repo, &store).await?;
        info!("cache rebuilt with {count} tracks");
    } else {
        ensure_fresh_cache(&repo, &store).await?;
    }

    let tracks = execute_search(store.pool(), &ast, sort.as_ref(), args.limit).await?;
    if tracks.is_empty() {
        if !ctx.quiet() {
            println!("No results for: {}", args.query);
        }
        return Ok(EXIT_SUCCESS);
    }

    let keys: Vec<String> = tracks.iter().map(|t| t.key.clone()).collect();
    let crates_by_key = store.load_crates(&keys).await?;

    match args.format {
        OutputFormat::Paths => print_paths(&tracks),
        OutputFormat::Json => print_json(&tracks, &crates_by_key)?,
        OutputFormat::Table => print_table(&tracks, &crates_by_key, &args.query),
    }
    Ok(EXIT_SUCCESS)
}

fn print_paths(tracks: &[Track]) {
    for track in tracks {
        println!("{}", track.file.as_deref().unwrap_or(""));
    }
}

fn print_json(tracks: &[Track], crates_by_key: &HashMap<String, Vec<String>>) -> Result<()> {
    let rows: Vec<serde_json::Value> = tracks
        .iter()
        .map(|t| {
            json!({
                "key": t.key,
                "file": t.file,
                "artist": t.artist,
                "title": t.title,
                "album": t.album,
                "genre": t.genre,
                "bpm": t.bpm,
                "rating": t.rating,
                "key_musical": t.key_musical,
                "year": t.year,
                "tracknumber": t.tracknumber,
                "comment": t.comment,
                "color": t.color,
                "crates": crates_by_key.get(&t.key).cloned().unwrap_or_default(),
                "present": t.present,
            })
        })
        .collect();
    let output = serde_json::to_string_pretty(&rows)
        .map_err(|e| Error::Internal(format!("json output: {e}")))?;
    println!("{output}");
    Ok(())
}

fn clip(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(width.saturating_sub(1)).collect();
        format!("{truncated}\u{2026}")
    }
}

fn print_table(tracks: &[Track], crates_by_key: &HashMap<String, Vec<String>>, query: &str) {
    println!("Search: {} ({} results)", query, tracks.len());

    let headers = ["Artist", "Title", "Album", "Genre", "BPM", "\u{2605}", "Key", "Crates", "File"];
    let rows: Vec<[String; 9]> = tracks
        .iter()
        .map(|t| {
            let crates = crates_by_key
                .get(&t.key)
                .map(|c| c.join(", "))
                .unwrap_or_default();
            [
                clip(t.artist.as_deref().unwrap_or(""), 25),
                clip(t.title.as_deref().unwrap_or(""), 25),
                clip(t.album.as_deref().unwrap_or(""), 25),
                t.genre.clone().unwrap_or_default(),
                t.bpm.map(|b| format!("{}", b.round() as i64)).unwrap_or_default(),
                t.rating.map(|r| r.to_string()).unwrap_or_default(),
                t.key_musical
                    .as_deref()
                    .map(|k| k.split(' ').next().unwrap_or(k).to_string())
                    .unwrap_or_default(),
                crates,
                t.file.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        let rendered: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect();
        println!("{}", rendered.join("  "));
    };

    line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    line(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>());
    for row in rows {
        line(&row.to_vec());
    }
}
