//! music-commander - git-annex music collection manager
//!
//! Thin clap layer over the core library: metadata cache, search,
//! integrity checking, export, and symlink views.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mc_common::config::load_config;
use mc_common::context::Verbosity;
use mc_common::RunContext;
use music_commander::commands::{
    self, check::CheckArgs, export::ExportArgs, search::OutputFormat, search::SearchArgs,
    view::ViewArgs,
};
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "music-commander")]
#[command(about = "Manage git-annex music collections with Mixxx integration")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/music-commander/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the git-annex music repository (overrides config)
    #[arg(short = 'R', long, global = true)]
    repo: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the local metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Search tracks by metadata using Mixxx-compatible syntax
    Search {
        /// Search query; multiple arguments are joined with spaces
        query: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "table", value_parser = ["table", "paths", "json"])]
        format: String,

        /// Limit number of results
        #[arg(short, long)]
        limit: Option<i64>,

        /// Sort by column name; prefix with - for descending (e.g. -bpm)
        #[arg(short, long)]
        sort: Option<String>,

        /// Force a full cache rebuild before searching
        #[arg(long)]
        rebuild_cache: bool,
    },
    /// Check integrity of audio files using format-specific tools
    Check {
        /// File paths, directories, or a search query
        args: Vec<String>,

        /// Output JSON report path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of parallel check jobs
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Continue from the last report, skipping already-checked files
        #[arg(short, long)]
        r#continue: bool,

        /// Warn on stereo FLAC files with a multichannel mask (Pioneer)
        #[arg(long)]
        flac_multichannel_check: bool,
    },
    /// Export audio files in a specified format
    Export {
        /// File paths, directories, or a search query
        args: Vec<String>,

        /// Format preset (mp3-320, mp3-v0, flac, flac-pioneer, aiff,
        /// aiff-pioneer, wav, wav-pioneer)
        #[arg(short, long)]
        format: Option<String>,

        /// Path template, e.g. "{{artist}}/{{title}}.mp3"
        #[arg(short, long)]
        pattern: String,

        /// Base output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of parallel export jobs
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Re-export all files (ignore existing outputs)
        #[arg(long)]
        force: bool,
    },
    /// Create a symlink directory tree from search results
    View {
        /// Search query; multiple arguments are joined with spaces
        query: Vec<String>,

        /// Path template, e.g. "{{genre}}/{{artist}} - {{title}}"
        #[arg(short, long)]
        pattern: String,

        /// Output directory for the symlink tree
        #[arg(short, long)]
        output: PathBuf,

        /// Create absolute symlinks instead of relative
        #[arg(long)]
        absolute: bool,

        /// Force a full cache rebuild before creating the view
        #[arg(long)]
        rebuild_cache: bool,

        /// Keep old symlinks instead of sweeping them first
        #[arg(long)]
        no_cleanup: bool,

        /// Also link files whose content is not locally present
        #[arg(long)]
        include_missing: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Build the full cache from the metadata branch
    Build,
    /// Incrementally refresh the cache
    Refresh,
    /// Delete the cache database (it is a derivative)
    Delete,
    /// Show cache freshness
    Status,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.debug {
        "music_commander=debug,mc_common=debug"
    } else if cli.verbose {
        "music_commander=info,mc_common=info"
    } else {
        "music_commander=warn,mc_common=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(cli.debug)
                .with_ansi(!cli.no_color),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.debug {
        Verbosity::Debug
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();
    let ctx = RunContext::new(verbosity, color);

    // First Ctrl-C requests cooperative shutdown; pipelines flush a
    // partial report before returning.
    let cancel = ctx.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("cancellation requested");
            cancel.cancel();
        }
    });

    let config = match load_config(cli.repo.as_deref(), cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(commands::EXIT_NO_REPO);
        }
    };
    let repo_root = config.music_repo.clone();
    if !repo_root.exists() {
        error!("music repository not found: {}", repo_root.display());
        std::process::exit(commands::EXIT_NO_REPO);
    }

    let result = match cli.command {
        Command::Cache { action } => match action {
            CacheAction::Build => commands::cache::run_build(&ctx, &repo_root).await,
            CacheAction::Refresh => commands::cache::run_refresh(&ctx, &repo_root).await,
            CacheAction::Delete => commands::cache::run_delete(&ctx, &repo_root).await,
            CacheAction::Status => commands::cache::run_status(&ctx, &repo_root).await,
        },
        Command::Search {
            query,
            format,
            limit,
            sort,
            rebuild_cache,
        } => {
            let format = match format.as_str() {
                "paths" => OutputFormat::Paths,
                "json" => OutputFormat::Json,
                _ => OutputFormat::Table,
            };
            commands::search::run(
                &ctx,
                &repo_root,
                SearchArgs {
                    query: query.join(" "),
                    format,
                    limit,
                    sort,
                    rebuild_cache,
                },
            )
            .await
        }
        Command::Check {
            args,
            output,
            jobs,
            r#continue,
            flac_multichannel_check,
        } => {
            commands::check::run(
                &ctx,
                &repo_root,
                CheckArgs {
                    args,
                    jobs,
                    output,
                    continue_run: r#continue,
                    flac_multichannel_check: flac_multichannel_check
                        || config.flac_multichannel_check,
                },
            )
            .await
        }
        Command::Export {
            args,
            format,
            pattern,
            output,
            jobs,
            force,
        } => {
            commands::export::run(
                &ctx,
                &repo_root,
                ExportArgs {
                    args,
                    format,
                    pattern,
                    output,
                    jobs,
                    force,
                },
            )
            .await
        }
        Command::View {
            query,
            pattern,
            output,
            absolute,
            rebuild_cache,
            no_cleanup,
            include_missing,
        } => {
            commands::view::run(
                &ctx,
                &repo_root,
                ViewArgs {
                    query: query.join(" "),
                    pattern,
                    output,
                    absolute,
                    rebuild_cache,
                    no_cleanup,
                    include_missing,
                },
            )
            .await
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(commands::exit_code_for(&e));
        }
    }
}
