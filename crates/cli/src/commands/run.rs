//! `run` command implementation.

use std::future::Future;

use anyhow::{Context, Result};
use stage_executor::FacePipeline;
use tracing::{info, warn};

use crate::cli::{RunArgs, StageGroup};
use crate::error::CliError;
use crate::pipeline::{build_pipeline, load_blueprint, run_group, RunStats};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(&args.target)?;
    if let Some(secs) = args.stage_timeout {
        info!(timeout_secs = secs, "Overriding stage timeout from CLI");
        blueprint.execution.stage_timeout_secs = Some(secs);
        config_loader::ConfigLoader::validate(&blueprint)
            .context("Invalid --stage-timeout")?;
    }

    let mut pipeline = build_pipeline(blueprint, &args.target)?;

    info!(
        input = %pipeline.paths().input.display(),
        output_dir = %pipeline.paths().output_dir.display(),
        retention = %pipeline.blueprint().cache.retention,
        stages = ?args.stages,
        "Configuration loaded"
    );

    if args.dry_run {
        let stages = pipeline.stages();
        pipeline
            .check_bindings(&stages)
            .context("Stage bindings are incomplete")?;
        let invoker = pipeline.executor().invoker();
        for stage in stages {
            let spec = pipeline.stage_spec(stage)?;
            println!("{:<24} {}", stage.as_str(), invoker.command_line(&spec.operation, &spec.params));
        }
        info!("Dry run mode - configuration and environment are valid, exiting");
        return Ok(());
    }

    let result = run_until_shutdown(&mut pipeline, args.stages, setup_shutdown_signal()).await;

    let stats = RunStats::from_report(pipeline.report());
    if args.json {
        let json = serde_json::to_string_pretty(&stats.report)
            .context("Failed to serialize run report")?;
        println!("{json}");
    } else {
        stats.print_summary();
    }

    result?;
    info!("Face pipeline finished");
    Ok(())
}

/// Run `group` unless `shutdown` resolves first
///
/// Dropping the run future kills the running child process.
async fn run_until_shutdown(
    pipeline: &mut FacePipeline,
    group: StageGroup,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = shutdown => {
            warn!("Received shutdown signal, no further stages will start");
            Err(CliError::Interrupted.into())
        }
        result = run_group(pipeline, group) => {
            result.context("Pipeline execution failed")
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TargetArgs;
    use contracts::PipelineBlueprint;
    use stage_executor::PROBE_EXECUTABLE;
    use tempfile::TempDir;

    #[tokio::test]
    async fn shutdown_signal_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("3DI");
        std::fs::create_dir_all(&install).unwrap();
        std::fs::write(install.join(PROBE_EXECUTABLE), b"").unwrap();
        let input = dir.path().join("session.mp4");
        std::fs::write(&input, b"video").unwrap();

        let target = TargetArgs {
            input: Some(input),
            output: Some(dir.path().join("out")),
            install_dir: Some(install),
            ..Default::default()
        };
        let mut pipeline = build_pipeline(PipelineBlueprint::default(), &target).unwrap();

        let err = run_until_shutdown(&mut pipeline, StageGroup::DetectFaces, async {})
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Interrupted)));
        assert!(pipeline.report().stages.is_empty());
    }
}
