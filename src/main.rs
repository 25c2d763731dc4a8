use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use foreman::config::RunArgs;

mod cmd;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Review-gated agent work-queue orchestrator")]
struct Cli {
    /// Workspace directory (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Mirror agent CLI output while it streams.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the stage chain, the bug and feedback tracks, and the backlog
    Run {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Show backlog and track progress for the workspace
    Status,
    /// Send one probe invocation through the agent CLI
    Smoke {
        /// Where the probe file should land (default: artifacts/smoke-test.md)
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Clear completion state so the next run starts over
    Reset {
        /// Also forget bug/feedback track progress
        #[arg(long)]
        stages: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let workspace = match cli.workspace.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // File-only subscriber; events must not interleave with the progress bar.
    let _log_guard = match &cli.command {
        Commands::Run { .. } | Commands::Smoke { .. } => init_tracing(&workspace, cli.verbose),
        _ => None,
    };

    match &cli.command {
        Commands::Run { args } => cmd::cmd_run(&workspace, args, cli.verbose).await?,
        Commands::Status => cmd::cmd_status(&workspace)?,
        Commands::Smoke { path, args } => {
            cmd::cmd_smoke(&workspace, args, path.clone(), cli.verbose).await?
        }
        Commands::Reset { stages, force } => cmd::cmd_reset(&workspace, *stages, *force)?,
    }

    Ok(())
}

fn init_tracing(
    workspace: &Path,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let layout = foreman::config::resolve_layout(workspace).ok()?;
    let log_dir = layout.log_dir();
    std::fs::create_dir_all(&log_dir).ok()?;

    let appender = tracing_appender::rolling::daily(log_dir, "foreman.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "foreman=debug" } else { "foreman=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .ok();
    Some(guard)
}
