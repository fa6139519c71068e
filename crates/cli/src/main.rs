//! # Face Pipeline CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - Install directory discovery
//! - Cached execution and status of pipeline stages

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_pipeline, run_status, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_observability(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Face pipeline CLI starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_pipeline(args).await,
        Commands::Status(args) => run_status(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging (and metrics for `run`) based on CLI options
fn init_observability(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let metrics_port = match &cli.command {
        Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port,
        default_log_level: default_log_level.to_string(),
    })
}
