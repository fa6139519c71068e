//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::PipelineBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    morphable_model: String,
    retention: String,
    require_sidecar: bool,
    helper_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    morphable_model: blueprint.backend.morphable_model.clone(),
                    retention: blueprint.cache.retention.to_string(),
                    require_sidecar: blueprint.cache.require_sidecar,
                    helper_count: blueprint.helpers.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Non-fatal configuration issues
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    let unbound: Vec<&str> = contracts::StageName::FUNCTION_STAGES
        .iter()
        .filter(|stage| !blueprint.helpers.contains_key(*stage))
        .map(|stage| stage.as_str())
        .collect();
    if !unbound.is_empty() {
        warnings.push(format!(
            "No helper configured for in-process stages: {} (run --stages all will fail)",
            unbound.join(", ")
        ));
    }

    if blueprint.cache.retention.is_zero() {
        warnings.push("cache.retention is zero - every output will be regenerated".to_string());
    }

    if blueprint.backend.install_dir.is_none() {
        warnings.push("backend.install_dir is not set - PATH_3DI or PATH will be searched".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Morphable model: {}", summary.morphable_model);
            println!("  Retention: {}", summary.retention);
            println!("  Require sidecar: {}", summary.require_sidecar);
            println!("  Helpers: {}", summary.helper_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn invalid_file_yields_invalid_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[localized]\nnormalize = true\n").unwrap();

        let result = validate_config(&ValidateArgs {
            config: path,
            json: true,
        });
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("statistics"));
    }

    #[test]
    fn missing_file_is_invalid() {
        let result = validate_config(&ValidateArgs {
            config: PathBuf::from("/nonexistent/pipeline.toml"),
            json: false,
        });
        assert!(!result.valid);
    }

    #[test]
    fn defaults_warn_about_unbound_stages() {
        let warnings = collect_warnings(&PipelineBlueprint::default());
        assert!(warnings.iter().any(|w| w.contains("shape_texture")));
    }
}
