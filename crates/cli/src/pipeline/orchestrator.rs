//! Blueprint loading, CLI overrides and pipeline construction.

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::{PipelineBlueprint, RetentionPeriod};
use stage_executor::{ExecutorError, FacePipeline};
use tracing::info;

use super::discovery::discover_install_dir;
use crate::cli::{StageGroup, TargetArgs};
use crate::error::CliError;

/// Load the configuration file (or defaults) and apply CLI overrides
pub fn load_blueprint(target: &TargetArgs) -> Result<PipelineBlueprint> {
    let mut blueprint = match &target.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path).into());
            }
            info!(config = %path.display(), "Loading configuration");
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            PipelineBlueprint::default()
        }
    };

    if let Some(retention) = &target.retention {
        blueprint.cache.retention = RetentionPeriod::parse(retention)
            .with_context(|| format!("Invalid --retention '{retention}'"))?;
    }
    if target.allow_missing_sidecar {
        blueprint.cache.require_sidecar = false;
    }
    if target.fast {
        blueprint.backend.fast = true;
    }
    if target.undistort {
        blueprint.execution.undistort = true;
    }

    ConfigLoader::validate(&blueprint).context("Configuration is invalid after CLI overrides")?;
    Ok(blueprint)
}

/// Resolve io and install directory, then build the pipeline
pub fn build_pipeline(blueprint: PipelineBlueprint, target: &TargetArgs) -> Result<FacePipeline> {
    let configured_io = blueprint
        .io
        .as_ref()
        .map(|io| (io.input.clone(), io.output_dir.clone()));
    let (input, output) = match (&target.input, &target.output, configured_io) {
        (Some(input), Some(output), _) => (input.clone(), output.clone()),
        (input, output, Some((cfg_input, cfg_output))) => (
            input.clone().unwrap_or(cfg_input),
            output.clone().unwrap_or(cfg_output),
        ),
        _ => return Err(CliError::MissingIo.into()),
    };

    let explicit = target
        .install_dir
        .as_deref()
        .or(blueprint.backend.install_dir.as_deref());
    let install_dir = discover_install_dir(
        explicit,
        std::env::var_os("PATH_3DI").as_deref(),
        std::env::var_os("PATH").as_deref(),
    )?;

    let pipeline = FacePipeline::builder(blueprint)
        .install_dir(install_dir)
        .io(input, output)
        .build()
        .context("Failed to set up the face pipeline")?;
    Ok(pipeline)
}

/// Run one stage group
pub async fn run_group(pipeline: &mut FacePipeline, group: StageGroup) -> Result<(), ExecutorError> {
    match group {
        StageGroup::All => pipeline.run_all().await.map(|_| ()),
        StageGroup::Preprocess => pipeline.preprocess().await.map(|_| ()),
        StageGroup::DetectFaces => pipeline.detect_faces().await.map(|_| ()),
        StageGroup::DetectLandmarks => pipeline.detect_landmarks().await.map(|_| ()),
        StageGroup::Fit => pipeline.fit().await.map(|_| ()),
        StageGroup::Localized => pipeline.localized_expressions().await.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn overrides_apply_on_defaults() {
        let target = TargetArgs {
            retention: Some("5 minutes".into()),
            allow_missing_sidecar: true,
            fast: true,
            ..Default::default()
        };
        let blueprint = load_blueprint(&target).unwrap();
        assert_eq!(blueprint.cache.retention.as_str(), "5 minutes");
        assert!(!blueprint.cache.require_sidecar);
        assert!(blueprint.backend.fast);
    }

    #[test]
    fn bad_retention_is_rejected() {
        let target = TargetArgs {
            retention: Some("5 eons".into()),
            ..Default::default()
        };
        assert!(load_blueprint(&target).is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let target = TargetArgs {
            config: Some(dir.path().join("absent.toml")),
            ..Default::default()
        };
        let err = load_blueprint(&target).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }

    #[test]
    fn io_is_required() {
        let target = TargetArgs {
            install_dir: Some("/opt/3DI".into()),
            ..Default::default()
        };
        let err = build_pipeline(PipelineBlueprint::default(), &target).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::MissingIo)));
    }
}
