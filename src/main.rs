//! `repo-fleet`: run git operations across every configured working copy.
//!
//! ## Commands
//!
//! - `fetch`: fetch all remotes of every repository
//! - `merge`: fast-forward repositories to their upstreams where safe
//! - `status` / `summary`: report dirty files and unpushed or unmerged commits
//! - `foreach`: run a command in every configured directory
//! - `add-dir`: add repositories to the configuration
//! - `wd`: print the configured repository that best matches some names

use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_fleet::config::FleetConfig;
use repo_fleet::executor::Executor;
use repo_fleet::fleet::{
    AddDirOutcome, Fleet, MergeAction, MergeOptions, best_match, render_json, render_pretty,
    render_summary,
};
use repo_fleet::git::GitClient;
use repo_fleet::output::{Painter, SharedSink};

#[derive(Parser)]
#[command(name = "repo-fleet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetch, merge and inspect a fleet of git working copies", long_about = None)]
struct Cli {
    /// Config file (default: $REPO_FLEET_CONFIG or ~/.repo-fleet/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deadline for each repository's operation, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Repositories processed concurrently, minus one
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Print more output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch remote data for every repository
    Fetch,

    /// Fast-forward every repository to its upstream
    Merge {
        /// Merge even if the working directory is dirty
        #[arg(long)]
        ignore_dirty: bool,

        /// Delete local branches merged into every main branch
        #[arg(long)]
        prune_local: bool,

        /// Comma-separated root branches for --prune-local
        #[arg(long, value_delimiter = ',')]
        main_branches: Option<Vec<String>>,

        /// Check out this branch first if the current branch is already merged into its upstream
        #[arg(long)]
        return_to: Option<String>,
    },

    /// Show status for every repository
    Status {
        #[arg(long, value_enum, default_value_t = Format::Pretty)]
        format: Format,
    },

    /// Show one line per repository
    Summary,

    /// Run a command in every configured directory
    Foreach {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Add directories (default: the current one) to the config
    AddDir { dirs: Vec<PathBuf> },

    /// Print the configured repository that best matches the given names
    Wd { names: Vec<String> },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "repo_fleet=debug"
    } else {
        "repo_fleet=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => FleetConfig::default_path()?,
    };
    let mut config = FleetConfig::load(&config_path)?;

    // Overrides apply to this run only; add-dir saves `config` as loaded.
    let mut settings = config.clone();
    settings.apply_env()?;
    if let Some(secs) = cli.timeout {
        settings.timeout_secs = Some(secs);
    }
    if let Some(n) = cli.max_concurrent {
        settings.max_concurrent = Some(n);
    }

    let use_color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    colored::control::set_override(use_color);
    let painter = Painter::new(use_color);
    let fleet = Fleet::new(
        GitClient::new(),
        Executor::new(settings.executor_config()),
        SharedSink::stdout(),
        painter,
    );
    let paths = config.repo_paths();
    let main_branches = settings.main_branches();

    match cli.command {
        Commands::Fetch => {
            fleet.fetch(&paths, cli.verbose).await?;
        }

        Commands::Merge {
            ignore_dirty,
            prune_local,
            main_branches: roots,
            return_to,
        } => {
            let options = MergeOptions {
                ignore_dirty,
                prune_local,
                main_branches: roots.unwrap_or(main_branches),
                return_to,
            };
            let report = fleet.merge(&paths, &options).await;
            let forwarded = report
                .outcomes
                .iter()
                .filter(|o| matches!(o.action, MergeAction::FastForwarded { .. }))
                .count();
            info!(
                repos = report.outcomes.len(),
                fast_forwarded = forwarded,
                "merge finished"
            );
            report.into_result()?;
        }

        Commands::Status { format } => {
            let statuses = fleet.status(&paths, &main_branches).await;
            let mut out = std::io::stdout().lock();
            match format {
                Format::Pretty => {
                    render_pretty(&mut out, &statuses, &main_branches, painter, chrono::Utc::now())?
                }
                Format::Json => render_json(&mut out, &statuses)?,
            }
            out.flush()?;
        }

        Commands::Summary => {
            let statuses = fleet.status(&paths, &main_branches).await;
            let mut out = std::io::stdout().lock();
            render_summary(&mut out, &statuses, &main_branches, painter, chrono::Utc::now())?;
            out.flush()?;
        }

        Commands::Foreach { command } => {
            fleet.foreach(&paths, &command).await?;
        }

        Commands::AddDir { mut dirs } => {
            if dirs.is_empty() {
                dirs.push(std::env::current_dir().context("failed to read current directory")?);
            }
            for outcome in fleet.add_dirs(&mut config, &dirs).await {
                match outcome {
                    AddDirOutcome::Added(repo) => println!("added {}", repo.display()),
                    AddDirOutcome::AlreadyPresent(repo) => {
                        println!("already present {}", repo.display())
                    }
                    AddDirOutcome::Rejected { dir, reason } => {
                        eprintln!("[warn] error adding {}: {}", dir.display(), reason)
                    }
                }
            }
            config
                .save(&config_path)
                .with_context(|| format!("failed to save {}", config_path.display()))?;
        }

        Commands::Wd { names } => match best_match(&paths, &names) {
            Some(repo) => println!("{}", repo.display()),
            None => bail!("no configured repository matches {}", names.join(" ")),
        },
    }

    Ok(())
}
