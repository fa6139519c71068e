//! `status` command implementation.

use anyhow::{Context, Result};
use contracts::CacheDecision;
use stage_executor::StageCacheStatus;
use tracing::info;

use crate::cli::StatusArgs;
use crate::pipeline::{build_pipeline, load_blueprint};

/// Execute the `status` command
pub fn run_status(args: &StatusArgs) -> Result<()> {
    let blueprint = load_blueprint(&args.target)?;
    let pipeline = build_pipeline(blueprint, &args.target)?;

    info!(input = %pipeline.paths().input.display(), "Inspecting stage outputs");
    let statuses = pipeline.status().context("Failed to inspect stage outputs")?;

    if args.json {
        let json = serde_json::to_string_pretty(&statuses)
            .context("Failed to serialize stage status")?;
        println!("{json}");
    } else {
        print_status(&statuses);
    }
    Ok(())
}

fn print_status(statuses: &[StageCacheStatus]) {
    for status in statuses {
        println!("{:<24} {}", status.stage.as_str(), status.decision);
        for output in &status.outputs {
            let detail = match (&output.decision, &output.reason) {
                (CacheDecision::Stale, Some(reason)) => format!(" ({reason})"),
                _ => String::new(),
            };
            println!(
                "   {} {}{}",
                output.decision,
                output.path.display(),
                detail
            );
        }
    }
    let pending = statuses
        .iter()
        .filter(|s| !s.decision.is_fresh())
        .count();
    println!("\n{pending} of {} stages would run", statuses.len());
}
