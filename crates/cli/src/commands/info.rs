//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, StageName};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    backend: BackendInfo,
    cache: CacheInfo,
    stages: Vec<StageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    container: Option<String>,
}

#[derive(Serialize)]
struct BackendInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    install_dir: Option<String>,
    camera_model: String,
    landmark_model: String,
    morphable_model: String,
    fast: bool,
}

#[derive(Serialize)]
struct CacheInfo {
    retention: String,
    retention_days: i64,
    require_sidecar: bool,
}

#[derive(Serialize)]
struct StageInfo {
    stage: StageName,
    description: &'static str,
    binding: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(&args.config).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&blueprint);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn stage_binding(blueprint: &PipelineBlueprint, stage: StageName) -> String {
    if !stage.is_function_stage() {
        return "3DI executable".to_string();
    }
    match blueprint.helpers.get(&stage) {
        Some(command) => format!("helper: {}", command.join(" ")),
        None => "unbound".to_string(),
    }
}

fn build_config_info(blueprint: &PipelineBlueprint) -> ConfigInfo {
    let stages = StageName::ALL
        .into_iter()
        .filter(|s| *s != StageName::Undistort || blueprint.execution.undistort)
        .map(|stage| StageInfo {
            stage,
            description: stage.display_name(),
            binding: stage_binding(blueprint, stage),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        backend: BackendInfo {
            install_dir: blueprint
                .backend
                .install_dir
                .as_ref()
                .map(|p| p.display().to_string()),
            camera_model: blueprint.backend.camera_model.clone(),
            landmark_model: blueprint.backend.landmark_model.clone(),
            morphable_model: blueprint.backend.morphable_model.clone(),
            fast: blueprint.backend.fast,
        },
        cache: CacheInfo {
            retention: blueprint.cache.retention.to_string(),
            retention_days: blueprint.cache.retention.span().num_days(),
            require_sidecar: blueprint.cache.require_sidecar,
        },
        stages,
        container: blueprint
            .execution
            .container
            .as_ref()
            .map(|c| format!("{} {}", c.engine, c.image)),
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("Face Pipeline Configuration ({})\n", info.version);

    println!("Backend");
    println!(
        "   ├─ Install dir: {}",
        info.backend.install_dir.as_deref().unwrap_or("(discovered at run time)")
    );
    println!("   ├─ Camera: {}", info.backend.camera_model);
    println!("   ├─ Landmarks: {}", info.backend.landmark_model);
    println!("   ├─ Morphable model: {}", info.backend.morphable_model);
    println!("   └─ Fast: {}", info.backend.fast);

    println!("\nCache");
    println!(
        "   ├─ Retention: {} ({} days)",
        info.cache.retention, info.cache.retention_days
    );
    println!("   └─ Require sidecar: {}", info.cache.require_sidecar);

    if let Some(container) = &info.container {
        println!("\nContainer: {container}");
    }

    println!("\nStages ({})", info.stages.len());
    for (i, stage) in info.stages.iter().enumerate() {
        let prefix = if i + 1 == info.stages.len() { "└─" } else { "├─" };
        println!(
            "   {} {:<24} {:<36} {}",
            prefix,
            stage.stage.as_str(),
            stage.description,
            stage.binding
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_lists_bindings() {
        let mut blueprint = PipelineBlueprint::default();
        blueprint
            .helpers
            .insert(StageName::SmoothPose, vec!["smooth-pose".into()]);
        let info = build_config_info(&blueprint);

        assert_eq!(info.stages.len(), 9);
        assert_eq!(info.cache.retention_days, 181);
        let smooth = info
            .stages
            .iter()
            .find(|s| s.stage == StageName::SmoothPose)
            .unwrap();
        assert_eq!(smooth.binding, "helper: smooth-pose");
    }
}
