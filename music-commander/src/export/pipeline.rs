//! Export pipeline: tag-driven path rendering, scheduling, and report
//! assembly.

use crate::export::encoder::{
    export_file, should_skip, ExportAction, ExportResult, ExportStatus,
};
use crate::export::presets::FormatPreset;
use crate::export::probe::probe_tags;
use crate::jobs::pool::{run_pool, ProgressEvent};
use crate::jobs::report::write_report_atomic;
use crate::view::symlinks::{make_unique_path, sanitize_rendered_path};
use crate::view::template::PathTemplate;
use mc_common::{Result, RunContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Report filename inside the export output directory.
pub const EXPORT_REPORT_NAME: &str = ".music-commander-export-report.json";

/// Per-status counters for the export summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub total: usize,
    pub ok: usize,
    pub copied: usize,
    pub skipped: usize,
    pub error: usize,
    pub not_present: usize,
}

impl ExportSummary {
    pub fn from_results(results: &[ExportResult]) -> Self {
        let mut summary = ExportSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                ExportStatus::Ok => summary.ok += 1,
                ExportStatus::Copied => summary.copied += 1,
                ExportStatus::Skipped => summary.skipped += 1,
                ExportStatus::Error => summary.error += 1,
                ExportStatus::NotPresent => summary.not_present += 1,
            }
        }
        summary
    }
}

/// Complete export report, serialized atomically to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub version: u32,
    pub timestamp: String,
    pub duration_seconds: f64,
    pub repository: String,
    pub output_dir: String,
    pub preset: String,
    pub arguments: Vec<String>,
    pub summary: ExportSummary,
    pub results: Vec<ExportResult>,
}

/// Options for an export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub jobs: usize,
    /// Re-export even when the target is newer than the source.
    pub force: bool,
    pub output_dir: PathBuf,
    pub pattern: String,
    pub preset: &'static FormatPreset,
}

/// What a finished (or interrupted) export run produced.
#[derive(Debug)]
pub struct ExportRunOutcome {
    pub report: ExportReport,
    pub report_path: PathBuf,
    pub cancelled: usize,
    pub was_cancelled: bool,
}

/// Extract the trailing file extension from a template pattern, if any.
pub fn template_extension(pattern: &str) -> Option<String> {
    let last_segment = pattern
        .replace("}}", "|")
        .replace('/', "|")
        .split('|')
        .last()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let dot = last_segment.rfind('.')?;
    let ext = &last_segment[dot..];
    if ext.len() > 1 && ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_lowercase())
    } else {
        None
    }
}

/// Template variables from the probed tag map, with the alias fallbacks
/// DJ tools actually write.
fn metadata_from_tags(
    tags: &HashMap<String, String>,
    source: &Path,
) -> BTreeMap<String, Option<String>> {
    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|k| tags.get(*k).cloned())
    };

    let mut map: BTreeMap<String, Option<String>> = BTreeMap::new();
    map.insert("artist".into(), get(&["artist"]));
    map.insert("title".into(), get(&["title"]));
    map.insert("album".into(), get(&["album"]));
    map.insert("genre".into(), get(&["genre"]));
    map.insert("bpm".into(), get(&["bpm", "tbpm"]));
    map.insert("rating".into(), get(&["rating"]));
    map.insert("key".into(), get(&["key", "initialkey", "initial_key"]));
    map.insert("year".into(), get(&["date", "year"]));
    map.insert("tracknumber".into(), get(&["track", "tracknumber"]));
    map.insert("comment".into(), get(&["comment"]));
    map.insert("file".into(), Some(source.to_string_lossy().into_owned()));
    map.insert(
        "filename".into(),
        source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned()),
    );
    map.insert(
        "ext".into(),
        source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy())),
    );
    map
}

fn progress_for(result: &ExportResult) -> ProgressEvent {
    let success = matches!(
        result.status,
        ExportStatus::Ok | ExportStatus::Copied | ExportStatus::Skipped
    );
    ProgressEvent {
        label: result.source.clone(),
        status: status_label(result.status).to_string(),
        success,
        message: result
            .error_message
            .as_deref()
            .map(|m| m.chars().take(500).collect())
            .unwrap_or_default(),
    }
}

fn status_label(status: ExportStatus) -> &'static str {
    match status {
        ExportStatus::Ok => "ok",
        ExportStatus::Copied => "copied",
        ExportStatus::Skipped => "skipped",
        ExportStatus::Error => "error",
        ExportStatus::NotPresent => "not_present",
    }
}

/// Render output paths for the present sources. Files without readable
/// tags are dropped with a warning, mirroring interactive behavior.
async fn render_output_paths(
    files: &[PathBuf],
    options: &ExportOptions,
    template: &PathTemplate,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let pattern_has_ext = template_extension(&options.pattern).is_some();
    let mut used_paths: HashSet<String> = HashSet::new();
    let mut pairs = Vec::new();

    for source in files {
        let tags = match probe_tags(source).await {
            Ok(tags) if !tags.is_empty() => tags,
            Ok(_) => {
                warn!("no tags for {}, skipping", source.display());
                continue;
            }
            Err(e) => {
                warn!("no readable tags for {}: {e}", source.display());
                continue;
            }
        };

        let rendered = template.render(&metadata_from_tags(&tags, source))?;
        let mut sanitized = sanitize_rendered_path(&rendered);
        if !pattern_has_ext {
            sanitized.push_str(options.preset.container);
        }
        let unique = make_unique_path(&sanitized, &mut used_paths);
        pairs.push((source.clone(), options.output_dir.join(unique)));
    }
    Ok(pairs)
}

/// Run the export pipeline over `files` and write the report.
///
/// Sources whose object-store content is absent are reported as
/// `not_present` without scheduling. A partial report is written even
/// when the run is cancelled.
pub async fn run_export(
    ctx: &RunContext,
    repo_root: &Path,
    files: Vec<PathBuf>,
    arguments: Vec<String>,
    options: ExportOptions,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
) -> Result<ExportRunOutcome> {
    let started = std::time::Instant::now();
    let report_path = options.output_dir.join(EXPORT_REPORT_NAME);
    let template = PathTemplate::compile(&options.pattern)?;

    let mut results: Vec<ExportResult> = Vec::new();
    let mut present: Vec<PathBuf> = Vec::new();
    for file in files {
        if file.exists() && crate::annex::repo::is_present(&file) {
            present.push(file);
        } else {
            results.push(ExportResult {
                source: file
                    .strip_prefix(repo_root)
                    .unwrap_or(&file)
                    .to_string_lossy()
                    .into_owned(),
                output: String::new(),
                status: ExportStatus::NotPresent,
                preset: options.preset.name.to_string(),
                action: ExportAction::Skipped,
                duration_seconds: 0.0,
                error_message: None,
            });
        }
    }

    let pairs = render_output_paths(&present, &options, &template).await?;
    info!(
        "exporting {} files with preset {}",
        pairs.len(),
        options.preset.name
    );

    let repo_root_owned = repo_root.to_path_buf();
    let preset = options.preset;
    let force = options.force;
    let outcome = run_pool(
        options.jobs,
        pairs,
        ctx,
        progress,
        move |(source, output): (PathBuf, PathBuf)| {
            let repo_root = repo_root_owned.clone();
            async move {
                let result = if should_skip(&source, &output, force) {
                    ExportResult {
                        source: source
                            .strip_prefix(&repo_root)
                            .unwrap_or(&source)
                            .to_string_lossy()
                            .into_owned(),
                        output: output
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        status: ExportStatus::Skipped,
                        preset: preset.name.to_string(),
                        action: ExportAction::Skipped,
                        duration_seconds: 0.0,
                        error_message: None,
                    }
                } else {
                    export_file(&source, &output, preset, &repo_root).await
                };
                let event = progress_for(&result);
                (result, event)
            }
        },
    )
    .await;

    let cancelled = outcome.cancelled.len();
    let was_cancelled = outcome.was_cancelled;
    results.extend(outcome.results);

    let report = ExportReport {
        version: 1,
        timestamp: mc_common::time::now_rfc3339(),
        duration_seconds: started.elapsed().as_secs_f64(),
        repository: repo_root.to_string_lossy().into_owned(),
        output_dir: options.output_dir.to_string_lossy().into_owned(),
        preset: options.preset.name.to_string(),
        arguments,
        summary: ExportSummary::from_results(&results),
        results,
    };
    write_report_atomic(&report, &report_path)?;
    info!("report written to {}", report_path.display());

    Ok(ExportRunOutcome {
        report,
        report_path,
        cancelled,
        was_cancelled,
    })
}
