mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use repeat_core::{DefaultFetcher, ImportResolver};
use repeat_scheduler::{Scheduler, SchedulerConfig};

use crate::cli::CliArgs;

/// Exit status after a signal-driven shutdown.
const EXIT_SIGNALLED: u8 = 1;
/// Exit status when configuration or startup fails.
const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.loglevel)),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    let scheduler = match prepare(&args).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = %format!("{e:#}"), "cannot start");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if let Some(archive) = scheduler.start().await {
        info!(archive = %archive.display(), "report written");
    }
    ExitCode::from(EXIT_SIGNALLED)
}

async fn prepare(args: &CliArgs) -> Result<Scheduler> {
    let mut resolver = ImportResolver::new(DefaultFetcher::new());
    let definitions = resolver
        .load_file(&args.config)
        .await
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!(
        config = %args.config.display(),
        collectors = definitions.len(),
        imports = resolver.loaded().count(),
        "configuration loaded"
    );

    let config = SchedulerConfig {
        base_dir: args.basedir.clone(),
        results_dir: args.results_dir.clone(),
        global_timeout: args.global_timeout(),
    };
    Scheduler::new(definitions, config)
        .await
        .context("failed to start scheduler")
}
