//! CLI entry point for Storyframe
//!
//! Parses command line arguments, runs the startup checks, and drives the
//! request service against local files.

mod local;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use local::LocalDirTransport;
use std::path::PathBuf;
use std::sync::Arc;
use storyframe::{
    collect_status, run_startup_checks, run_status_server, setup_directories, spawn_sweeper,
    startup_sweep, Config, RequestOutcome, StoryService,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Storyframe - bordered 1080x1920 story variants from one video
#[derive(Parser, Debug)]
#[command(name = "storyframe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the ffmpeg/ffprobe availability checks. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce variants for each file and copy them to the delivery directory
    Process {
        /// Source videos
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Requester id the uploads are attributed to
        #[arg(long, default_value = "local")]
        requester: String,

        /// Where delivered variants and their captions are written
        #[arg(long, default_value = "delivered")]
        deliver_dir: PathBuf,
    },
    /// Remove stale files from the staging directories and exit
    Sweep,
    /// Print the current status snapshot as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(config = %args.config.display(), "Storyframe starting");

    match args.command {
        Command::Sweep => {
            setup_directories(&config.paths)?;
            let (temp, output) = startup_sweep(&config);
            println!(
                "temp: removed {} of {} ({} bytes), output: removed {} of {} ({} bytes)",
                temp.removed,
                temp.scanned,
                temp.bytes_freed,
                output.removed,
                output.scanned,
                output.bytes_freed
            );
            Ok(())
        }
        Command::Status => {
            let service = StoryService::new(config);
            let status = collect_status(&service);
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Process {
            files,
            requester,
            deliver_dir,
        } => {
            if args.skip_checks {
                warn!("skipping startup checks (--skip-checks enabled)");
            } else {
                run_startup_checks(&config).context("startup checks failed")?;
            }
            setup_directories(&config.paths)?;
            startup_sweep(&config);

            process(config, files, requester, deliver_dir).await
        }
    }
}

async fn process(
    config: Config,
    files: Vec<PathBuf>,
    requester: String,
    deliver_dir: PathBuf,
) -> Result<()> {
    let sweeper = spawn_sweeper(config.paths.clone(), config.cleanup.clone());
    let status_bind = config.status.enabled.then(|| config.status.bind.clone());

    let service = Arc::new(StoryService::new(config));
    let transport = Arc::new(LocalDirTransport::new(deliver_dir));

    let status_server = status_bind.map(|bind| {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(service, &bind).await {
                error!(error = %e, "status server stopped");
            }
        })
    });

    let total = files.len();
    let mut tasks = JoinSet::new();
    for path in files {
        let upload = LocalDirTransport::upload_for(&requester, &path);
        let service = service.clone();
        let transport = transport.clone();
        tasks.spawn(async move { service.handle(upload, transport.as_ref()).await });
    }

    let mut failures = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(RequestOutcome::Delivered { variants }) => {
                info!(variants, "request delivered");
            }
            Ok(RequestOutcome::Rejected(e)) | Ok(RequestOutcome::Failed(e)) => {
                warn!(error = %e, "request did not complete");
                failures += 1;
            }
            Err(e) => {
                error!(error = %e, "request task aborted");
                failures += 1;
            }
        }
    }

    if let Some(handle) = sweeper {
        handle.abort();
    }
    if let Some(handle) = status_server {
        handle.abort();
    }

    let stats = service.stats();
    info!(
        received = stats.received,
        delivered = stats.delivered,
        variants = stats.variants_delivered,
        "all requests finished"
    );

    if failures > 0 {
        anyhow::bail!("{} of {} requests did not complete", failures, total);
    }
    Ok(())
}
