//! `export` subcommand: render target paths and drive the encoder
//! pipeline.

use crate::commands::check::spawn_progress_printer;
use crate::commands::{
    open_repo, resolve_args_to_files, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS,
};
use crate::export::{
    preset_by_name, preset_for_extension, run_export, template_extension, ExportOptions,
    FormatPreset, PRESETS,
};
use mc_common::{Error, Result, RunContext};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub args: Vec<String>,
    pub format: Option<String>,
    pub pattern: String,
    pub output: PathBuf,
    pub jobs: usize,
    pub force: bool,
}

/// Resolve the preset from the explicit flag or the template extension.
pub fn resolve_preset(
    format: Option<&str>,
    pattern: &str,
) -> Result<&'static FormatPreset> {
    if let Some(name) = format {
        let preset = preset_by_name(name).ok_or_else(|| {
            let valid: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
            Error::Parse(format!(
                "invalid format preset '{name}'; valid presets: {}",
                valid.join(", ")
            ))
        })?;
        if let Some(ext) = template_extension(pattern) {
            if ext != preset.container {
                warn!(
                    "template extension '{ext}' differs from preset container '{}'",
                    preset.container
                );
            }
        }
        return Ok(preset);
    }

    let ext = template_extension(pattern).ok_or_else(|| {
        Error::Parse(
            "cannot infer format from template (no file extension found); \
             use --format to specify a preset"
                .into(),
        )
    })?;
    preset_for_extension(&ext).ok_or_else(|| {
        Error::Parse(format!(
            "unrecognized template extension '{ext}'; use --format to specify a preset"
        ))
    })
}

pub async fn run(ctx: &RunContext, repo_root: &Path, args: ExportArgs) -> Result<i32> {
    let preset = resolve_preset(args.format.as_deref(), &args.pattern)?;
    if !ctx.quiet() {
        println!("Using preset: {}", preset.name);
    }

    let (repo, store) = open_repo(repo_root).await?;
    let files = resolve_args_to_files(ctx, &repo, &store, &args.args).await?;
    if files.is_empty() {
        if !ctx.quiet() {
            println!("No files to export");
        }
        return Ok(EXIT_SUCCESS);
    }

    let progress = spawn_progress_printer(ctx);
    let outcome = run_export(
        ctx,
        repo_root,
        files,
        args.args.clone(),
        ExportOptions {
            jobs: args.jobs,
            force: args.force,
            output_dir: args.output.clone(),
            pattern: args.pattern.clone(),
            preset,
        },
        progress,
    )
    .await?;

    if !ctx.quiet() {
        let summary = &outcome.report.summary;
        println!(
            "exported {}: {} encoded, {} copied, {} skipped, {} error, {} not present",
            summary.total, summary.ok, summary.copied, summary.skipped, summary.error,
            summary.not_present
        );
        println!("Report written to: {}", outcome.report_path.display());
        if outcome.was_cancelled {
            println!("Interrupted: {} files were never exported", outcome.cancelled);
        }
    }

    if outcome.was_cancelled || outcome.report.summary.error > 0 {
        Ok(EXIT_PARTIAL_FAILURE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
