//! Check pipeline: classification, scheduling, and report assembly.

use crate::check::registry::FileResolution;
use crate::check::runner::{
    check_file, check_tool_available, CheckFileOptions, CheckResult, CheckStatus,
};
use crate::check::registry::get_checkers_for_file;
use crate::jobs::pool::{run_pool, ProgressEvent};
use crate::jobs::report::write_report_atomic;
use mc_common::{Result, RunContext};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Default report filename inside the repository root.
pub const CHECK_REPORT_NAME: &str = ".music-commander-check-results.json";

/// Per-status counters for the report summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total: usize,
    pub ok: usize,
    pub warning: usize,
    pub error: usize,
    pub not_present: usize,
    pub checker_missing: usize,
    pub skipped: usize,
}

impl CheckSummary {
    pub fn from_results(results: &[CheckResult]) -> Self {
        let mut summary = CheckSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                CheckStatus::Ok => summary.ok += 1,
                CheckStatus::Warning => summary.warning += 1,
                CheckStatus::Error => summary.error += 1,
                CheckStatus::NotPresent => summary.not_present += 1,
                CheckStatus::CheckerMissing => summary.checker_missing += 1,
                CheckStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Complete integrity check report, serialized atomically to JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub version: u32,
    pub timestamp: String,
    pub duration_seconds: f64,
    pub repository: String,
    pub arguments: Vec<String>,
    pub summary: CheckSummary,
    pub results: Vec<CheckResult>,
}

/// Options for a check run.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub jobs: usize,
    /// Report path override; defaults to the repo-root report file.
    pub output: Option<PathBuf>,
    /// Carry forward passing results from the previous report and only
    /// re-run the rest.
    pub continue_run: bool,
    pub flac_multichannel_check: bool,
}

/// What a finished (or interrupted) check run produced.
#[derive(Debug)]
pub struct CheckRunOutcome {
    pub report: CheckReport,
    pub report_path: PathBuf,
    /// Files never started because of cancellation.
    pub cancelled: usize,
    pub was_cancelled: bool,
}

fn rel_path(file: &Path, repo_root: &Path) -> String {
    file.strip_prefix(repo_root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}

fn progress_for(result: &CheckResult) -> ProgressEvent {
    let success = matches!(result.status, CheckStatus::Ok | CheckStatus::Warning);
    let message = if result.status == CheckStatus::Warning {
        result.warnings.first().map(|w| truncate(&w.output, 500))
    } else if !success {
        result.errors.first().map(|e| truncate(&e.output, 500))
    } else {
        None
    };
    ProgressEvent {
        label: result.file.clone(),
        status: status_label(result.status).to_string(),
        success,
        message: message.unwrap_or_default(),
    }
}

fn status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Ok => "ok",
        CheckStatus::Warning => "warning",
        CheckStatus::Error => "error",
        CheckStatus::NotPresent => "not_present",
        CheckStatus::CheckerMissing => "checker_missing",
        CheckStatus::Skipped => "skipped",
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

/// Load the previous report's passing results for `--continue`.
fn load_carried_results(report_path: &Path) -> Vec<CheckResult> {
    let Ok(content) = std::fs::read_to_string(report_path) else {
        warn!("no previous report found at {}", report_path.display());
        return Vec::new();
    };
    match serde_json::from_str::<CheckReport>(&content) {
        Ok(report) => report
            .results
            .into_iter()
            .filter(|r| matches!(r.status, CheckStatus::Ok | CheckStatus::Warning))
            .collect(),
        Err(e) => {
            warn!("could not read previous report {}: {e}", report_path.display());
            Vec::new()
        }
    }
}

/// Run integrity checks over `files` and write the report.
///
/// A partial report is written even when the run is cancelled; the
/// outcome's `cancelled` count plus `report.results` covers every
/// requested file.
pub async fn run_check(
    ctx: &RunContext,
    repo_root: &Path,
    files: Vec<PathBuf>,
    arguments: Vec<String>,
    options: CheckOptions,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
) -> Result<CheckRunOutcome> {
    let started = std::time::Instant::now();
    let report_path = options
        .output
        .clone()
        .unwrap_or_else(|| repo_root.join(CHECK_REPORT_NAME));

    let mut results: Vec<CheckResult> = Vec::new();
    let mut previously_checked: HashSet<String> = HashSet::new();

    if options.continue_run {
        let carried = load_carried_results(&report_path);
        if !carried.is_empty() {
            info!("continuing: {} files already checked", carried.len());
        }
        previously_checked.extend(carried.iter().map(|r| r.file.clone()));
        results.extend(carried);
    }

    // Classify upfront so missing blobs and unknown formats never enter
    // the pool.
    let mut to_check: Vec<PathBuf> = Vec::new();
    for file in files {
        let rel = rel_path(&file, repo_root);
        if previously_checked.contains(&rel) {
            continue;
        }

        if !file.exists() || !crate::annex::repo::is_present(&file) {
            results.push(CheckResult {
                file: rel,
                status: CheckStatus::NotPresent,
                tools: Vec::new(),
                errors: Vec::new(),
                warnings: Vec::new(),
            });
            continue;
        }

        match get_checkers_for_file(&file) {
            FileResolution::Skipped => {
                results.push(CheckResult {
                    file: rel,
                    status: CheckStatus::Skipped,
                    tools: Vec::new(),
                    errors: Vec::new(),
                    warnings: Vec::new(),
                });
            }
            FileResolution::Group(group) => {
                let has_internal = group.internal_validator.is_some();
                let all_missing = !group.checkers.is_empty()
                    && group
                        .checkers
                        .iter()
                        .all(|spec| !check_tool_available(spec.program));
                if !has_internal && all_missing {
                    let mut tools: Vec<String> = group
                        .checkers
                        .iter()
                        .map(|spec| spec.program.to_string())
                        .collect();
                    tools.sort();
                    tools.dedup();
                    results.push(CheckResult {
                        file: rel,
                        status: CheckStatus::CheckerMissing,
                        tools,
                        errors: Vec::new(),
                        warnings: Vec::new(),
                    });
                } else {
                    to_check.push(file);
                }
            }
        }
    }

    info!("checking {} files", to_check.len());

    let repo_root_owned = repo_root.to_path_buf();
    let check_options = CheckFileOptions {
        flac_multichannel_check: options.flac_multichannel_check,
    };
    let outcome = run_pool(
        options.jobs,
        to_check,
        ctx,
        progress,
        move |file: PathBuf| {
            let repo_root = repo_root_owned.clone();
            async move {
                let result = check_file(&file, &repo_root, check_options).await;
                let event = progress_for(&result);
                (result, event)
            }
        },
    )
    .await;

    let cancelled = outcome.cancelled.len();
    let was_cancelled = outcome.was_cancelled;
    results.extend(outcome.results);

    let report = CheckReport {
        version: 1,
        timestamp: mc_common::time::now_rfc3339(),
        duration_seconds: started.elapsed().as_secs_f64(),
        repository: repo_root.to_string_lossy().into_owned(),
        arguments,
        summary: CheckSummary::from_results(&results),
        results,
    };
    write_report_atomic(&report, &report_path)?;
    info!("report written to {}", report_path.display());

    Ok(CheckRunOutcome {
        report,
        report_path,
        cancelled,
        was_cancelled,
    })
}
