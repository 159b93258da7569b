//! Symlink tree creation from cache rows and a compiled path template.

use crate::cache::models::Track;
use crate::view::template::PathTemplate;
use mc_common::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Sanitize a single path segment for filesystem safety.
///
/// Unsafe characters become `-`, leading/trailing whitespace and dots
/// are stripped, the segment is truncated to 255 bytes, and an empty
/// result becomes `Unknown`.
pub fn sanitize_path_segment(segment: &str) -> String {
    let replaced: String = segment
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' | '/' | '\\' => '-',
            other => other,
        })
        .collect();
    let trimmed = replaced
        .trim()
        .trim_matches('.')
        .trim()
        .to_string();

    let mut out = trimmed;
    while out.len() > 255 {
        // Trim whole characters until it fits in 255 bytes.
        let mut end = 255.min(out.len() - 1);
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
    }

    if out.is_empty() {
        "Unknown".to_string()
    } else {
        out
    }
}

/// Sanitize a rendered path, keeping `/` separators and dropping empty
/// segments.
pub fn sanitize_rendered_path(rendered: &str) -> String {
    rendered
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize_path_segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Ensure a path is unique within `used`, appending `_1, _2, …` before
/// the extension when needed.
pub fn make_unique_path(path: &str, used: &mut HashSet<String>) -> String {
    if used.insert(path.to_string()) {
        return path.to_string();
    }

    let (base, ext) = split_extension(path);
    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Split a path into (stem, extension-with-dot), only looking at the
/// final segment.
fn split_extension(path: &str) -> (&str, &str) {
    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(segment_start + dot),
        _ => (path, ""),
    }
}

/// Remove old symlinks from the output directory and prune directories
/// left empty, bottom-up. Regular files are never touched.
///
/// Returns the number of symlinks removed.
pub fn cleanup_output_dir(output_dir: &Path) -> Result<usize> {
    if !output_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(output_dir).into_iter().flatten() {
        if entry.path_is_symlink() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    for entry in WalkDir::new(output_dir)
        .contents_first(true)
        .into_iter()
        .flatten()
    {
        let path = entry.path();
        if path == output_dir || !entry.file_type().is_dir() {
            continue;
        }
        // Only empty directories go; rmdir refuses the rest.
        let _ = std::fs::remove_dir(path);
    }

    debug!("removed {removed} stale symlinks");
    Ok(removed)
}

fn track_metadata(track: &Track, crate_value: Option<&str>) -> BTreeMap<String, Option<String>> {
    let mut map: BTreeMap<String, Option<String>> = BTreeMap::new();
    map.insert("artist".into(), track.artist.clone());
    map.insert("title".into(), track.title.clone());
    map.insert("album".into(), track.album.clone());
    map.insert("genre".into(), track.genre.clone());
    map.insert("bpm".into(), track.bpm.map(|b| format_number(b)));
    map.insert("rating".into(), track.rating.map(|r| r.to_string()));
    map.insert("key".into(), track.key_musical.clone());
    map.insert("year".into(), track.year.clone());
    map.insert("tracknumber".into(), track.tracknumber.clone());
    map.insert("comment".into(), track.comment.clone());
    map.insert("color".into(), track.color.clone());
    map.insert("file".into(), track.file.clone());
    if let Some(value) = crate_value {
        map.insert("crate".into(), Some(value.to_string()));
    }
    map
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlink views require a Unix filesystem",
    ))
}

/// Relative path from `base` to `target` (both absolute or both
/// repo-relative).
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target_parts: Vec<_> = target.components().collect();
    let base_parts: Vec<_> = base.components().collect();

    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..base_parts.len() {
        result.push("..");
    }
    for part in &target_parts[common..] {
        result.push(part);
    }
    result
}

/// Create a symlink tree for `tracks` under `output_dir`.
///
/// Tracks without a file path are skipped. When the template references
/// `crate`, a track with N crate memberships yields N links. Returns
/// `(links_created, duplicates_renamed)`.
pub fn create_symlink_tree(
    tracks: &[Track],
    crates_by_key: &HashMap<String, Vec<String>>,
    template: &PathTemplate,
    output_dir: &Path,
    repo_root: &Path,
    absolute: bool,
) -> Result<(usize, usize)> {
    let expand_crates = template.variables().contains("crate");
    let mut used_paths: HashSet<String> = HashSet::new();
    let mut created = 0;
    let mut duplicates = 0;

    std::fs::create_dir_all(output_dir)?;

    for track in tracks {
        let Some(file) = &track.file else {
            continue;
        };

        let crates = crates_by_key.get(&track.key);
        let expansions: Vec<Option<&str>> = match (expand_crates, crates) {
            (true, Some(values)) if !values.is_empty() => {
                values.iter().map(|v| Some(v.as_str())).collect()
            }
            _ => vec![None],
        };

        for crate_value in expansions {
            let rendered = template.render(&track_metadata(track, crate_value))?;
            let mut sanitized = sanitize_rendered_path(&rendered);

            // Keep the source file's extension.
            if let Some(ext) = Path::new(file).extension() {
                let suffix = format!(".{}", ext.to_string_lossy());
                if !sanitized.ends_with(&suffix) {
                    sanitized.push_str(&suffix);
                }
            }

            let unique = make_unique_path(&sanitized, &mut used_paths);
            if unique != sanitized {
                duplicates += 1;
            }

            let link_path = output_dir.join(&unique);
            if let Some(parent) = link_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let target_file = repo_root.join(file);
            let target = if absolute {
                target_file
                    .canonicalize()
                    .unwrap_or(target_file)
            } else {
                let parent = link_path.parent().unwrap_or(output_dir);
                relative_to(&target_file, parent)
            };

            if link_path.is_symlink() {
                std::fs::remove_file(&link_path)?;
            }
            make_symlink(&target, &link_path).map_err(Error::Io)?;
            created += 1;
        }
    }

    Ok((created, duplicates))
}
