//! Cache builder: full rebuild and incremental refresh from the
//! metadata branch.

use crate::annex::{key_from_log_path, parse_metadata_log, MetadataSnapshot, MetadataSource};
use crate::cache::models::{CacheState, CrateMembership, Track};
use crate::cache::store::CacheStore;
use mc_common::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Lower a snapshot to a cache row. Scalar columns take the first
/// value; unparsable bpm/rating are left null.
fn snapshot_to_track(
    key: &str,
    snapshot: &MetadataSnapshot,
    file: Option<&str>,
    present: bool,
) -> Track {
    let first = |field: &str| -> Option<String> {
        snapshot.get(field).and_then(|v| v.first()).cloned()
    };

    Track {
        key: key.to_string(),
        file: file.map(str::to_string),
        artist: first("artist"),
        title: first("title"),
        album: first("album"),
        genre: first("genre"),
        bpm: first("bpm").and_then(|v| v.parse::<f64>().ok()),
        rating: first("rating").and_then(|v| v.parse::<i64>().ok()),
        key_musical: first("key"),
        year: first("year"),
        tracknumber: first("tracknumber"),
        comment: first("comment"),
        color: first("color"),
        present,
    }
}

/// One membership row per non-empty value of the `crate` field.
fn snapshot_to_crates(key: &str, snapshot: &MetadataSnapshot) -> Vec<CrateMembership> {
    snapshot
        .get("crate")
        .map(|values| {
            values
                .iter()
                .filter(|v| !v.is_empty())
                .map(|v| CrateMembership {
                    key: key.to_string(),
                    crate_name: v.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build the full cache from the metadata branch. Returns the number of
/// tracks written.
pub async fn build_cache(source: &dyn MetadataSource, store: &CacheStore) -> Result<usize> {
    info!("reading metadata from the annex branch");
    let blobs = source.list_log_blobs().await?;
    let key_by_blob: HashMap<String, String> = blobs
        .iter()
        .map(|b| (b.blob_id.clone(), key_from_log_path(&b.path)))
        .collect();

    let blob_ids: Vec<String> = blobs.iter().map(|b| b.blob_id.clone()).collect();
    let mut snapshots: HashMap<String, MetadataSnapshot> = HashMap::new();
    for (blob_id, content) in source.read_blobs(&blob_ids).await? {
        let Some(key) = key_by_blob.get(&blob_id) else {
            continue;
        };
        let snapshot = parse_metadata_log(&content);
        if !snapshot.is_empty() {
            snapshots.insert(key.clone(), snapshot);
        }
    }
    debug!("decoded {} metadata snapshots", snapshots.len());

    let key_to_file = source.list_all_annexed_paths().await?;
    let present_keys = source.list_present_keys().await?;

    let mut tracks = Vec::with_capacity(snapshots.len());
    let mut memberships = Vec::new();
    for (key, snapshot) in &snapshots {
        let file = key_to_file.get(key).map(String::as_str);
        let present = file.is_some() && present_keys.contains(key);
        tracks.push(snapshot_to_track(key, snapshot, file, present));
        memberships.extend(snapshot_to_crates(key, snapshot));
    }

    let state = CacheState {
        branch_pointer: source.current_branch_pointer().await?,
        last_updated: Some(mc_common::time::now_rfc3339()),
        track_count: Some(tracks.len() as i64),
    };
    store.replace_all(&tracks, &memberships, &state).await?;

    info!("cache built: {} tracks", tracks.len());
    Ok(tracks.len())
}

/// Incrementally refresh the cache if the metadata branch moved.
///
/// Returns the number of changed keys, or None when no refresh was
/// needed. Falls back to a full build when no cache state exists.
pub async fn refresh_cache(
    source: &dyn MetadataSource,
    store: &CacheStore,
) -> Result<Option<usize>> {
    let Some(current) = source.current_branch_pointer().await? else {
        return Ok(None);
    };

    let state = store.state().await?;
    let old = match state.and_then(|s| s.branch_pointer) {
        Some(pointer) => pointer,
        None => return Ok(Some(build_cache(source, store).await?)),
    };

    if old == current {
        debug!("cache is current, no refresh needed");
        return Ok(None);
    }

    let changed_paths = source.diff_changed_paths(&old, &current).await?;
    let new_state = CacheState {
        branch_pointer: Some(current.clone()),
        last_updated: Some(mc_common::time::now_rfc3339()),
        track_count: None,
    };

    if changed_paths.is_empty() {
        // Branch moved without metadata changes: just advance the pointer.
        store.patch(&[], &[], &[], &new_state).await?;
        return Ok(Some(0));
    }
    info!("{} changed metadata files detected", changed_paths.len());

    let key_to_file = source.list_all_annexed_paths().await?;
    let present_keys = source.list_present_keys().await?;

    let mut keys_to_replace = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut new_tracks = Vec::new();
    let mut new_memberships = Vec::new();

    for path in &changed_paths {
        let key = key_from_log_path(path);
        if !seen.insert(key.clone()) {
            continue;
        }
        keys_to_replace.push(key.clone());

        // A missing blob means the key's metadata was deleted; the key
        // is replaced with nothing.
        let Some(content) = source.read_blob_at_path(path).await? else {
            continue;
        };
        let snapshot = parse_metadata_log(&content);
        if snapshot.is_empty() {
            continue;
        }

        let file = key_to_file.get(&key).map(String::as_str);
        let present = file.is_some() && present_keys.contains(&key);
        new_tracks.push(snapshot_to_track(&key, &snapshot, file, present));
        new_memberships.extend(snapshot_to_crates(&key, &snapshot));
    }

    store
        .patch(&keys_to_replace, &new_tracks, &new_memberships, &new_state)
        .await?;
    Ok(Some(keys_to_replace.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &[&str])]) -> MetadataSnapshot {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn track_lowering_takes_first_values() {
        let snap = snapshot(&[
            ("artist", &["Aphex Twin"]),
            ("bpm", &["140.5"]),
            ("rating", &["4"]),
            ("key", &["5m (D#m)"]),
            ("crate", &["A", "B"]),
        ]);
        let track = snapshot_to_track("k1", &snap, Some("x/y.flac"), true);
        assert_eq!(track.artist.as_deref(), Some("Aphex Twin"));
        assert_eq!(track.bpm, Some(140.5));
        assert_eq!(track.rating, Some(4));
        assert_eq!(track.key_musical.as_deref(), Some("5m (D#m)"));
        assert_eq!(track.file.as_deref(), Some("x/y.flac"));
        assert!(track.present);
    }

    #[test]
    fn invalid_numbers_leave_fields_null() {
        let snap = snapshot(&[("bpm", &["fast"]), ("rating", &["five"])]);
        let track = snapshot_to_track("k1", &snap, None, false);
        assert_eq!(track.bpm, None);
        assert_eq!(track.rating, None);
        assert_eq!(track.file, None);
        assert!(!track.present);
    }

    #[test]
    fn crate_rows_skip_empty_values() {
        let snap = snapshot(&[("crate", &["Festival", "", "Club"])]);
        let crates = snapshot_to_crates("k1", &snap);
        let names: Vec<_> = crates.iter().map(|c| c.crate_name.as_str()).collect();
        assert_eq!(names, vec!["Festival", "Club"]);
        assert!(crates.iter().all(|c| c.key == "k1"));
    }
}
