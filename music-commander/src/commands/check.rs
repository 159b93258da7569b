//! `check` subcommand: run the integrity pipeline over resolved files.

use crate::annex::repo::is_annexed;
use crate::check::{run_check, CheckOptions};
use crate::commands::{
    open_repo, resolve_args_to_files, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS,
};
use crate::jobs::pool::ProgressEvent;
use mc_common::{Result, RunContext};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub args: Vec<String>,
    pub jobs: usize,
    pub output: Option<PathBuf>,
    pub continue_run: bool,
    pub flac_multichannel_check: bool,
}

/// Drain progress events onto stdout from the main task; workers never
/// print themselves.
pub fn spawn_progress_printer(
    ctx: &RunContext,
) -> Option<mpsc::UnboundedSender<ProgressEvent>> {
    if ctx.quiet() {
        return None;
    }
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event.message.is_empty() {
                println!("[{}] {}", event.status, event.label);
            } else {
                let first_line = event.message.lines().next().unwrap_or("");
                println!("[{}] {} - {}", event.status, event.label, first_line);
            }
        }
    });
    Some(tx)
}

pub async fn run(ctx: &RunContext, repo_root: &Path, args: CheckArgs) -> Result<i32> {
    let (repo, store) = open_repo(repo_root).await?;

    let files = resolve_args_to_files(ctx, &repo, &store, &args.args).await?;
    let annexed: Vec<PathBuf> = files.into_iter().filter(|f| is_annexed(f)).collect();
    if annexed.is_empty() {
        if !ctx.quiet() {
            println!("No annexed files to check");
        }
        return Ok(EXIT_SUCCESS);
    }

    let progress = spawn_progress_printer(ctx);
    let outcome = run_check(
        ctx,
        repo_root,
        annexed,
        args.args.clone(),
        CheckOptions {
            jobs: args.jobs,
            output: args.output.clone(),
            continue_run: args.continue_run,
            flac_multichannel_check: args.flac_multichannel_check,
        },
        progress,
    )
    .await?;

    if !ctx.quiet() {
        let summary = &outcome.report.summary;
        println!(
            "checked {}: {} ok, {} warning, {} error, {} not present, {} checker missing, {} skipped",
            summary.total,
            summary.ok,
            summary.warning,
            summary.error,
            summary.not_present,
            summary.checker_missing,
            summary.skipped
        );
        println!("Report written to: {}", outcome.report_path.display());
        if outcome.was_cancelled {
            println!("Interrupted: {} files were never checked", outcome.cancelled);
        }
    }

    if outcome.was_cancelled || outcome.report.summary.error > 0 {
        Ok(EXIT_PARTIAL_FAILURE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
