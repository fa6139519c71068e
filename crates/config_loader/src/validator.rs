//! Configuration validation
//!
//! Rules:
//! - field constraints declared on the blueprint types (non-empty model
//!   names, positive timeout)
//! - helpers only bind in-process stages, with a non-empty program
//! - normalization needs a statistics file
//! - a container needs a non-empty engine and image

use contracts::{ContractError, PipelineBlueprint};
use validator::Validate;

/// Validate a PipelineBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_helpers(blueprint)?;
    validate_localized(blueprint)?;
    validate_container(blueprint)?;
    Ok(())
}

fn validate_fields(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let field = errors
            .errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "blueprint".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn validate_helpers(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    for (stage, command) in &blueprint.helpers {
        if !stage.is_function_stage() {
            return Err(ContractError::config_validation(
                format!("helpers.{stage}"),
                format!("'{stage}' is not an in-process stage and cannot be rebound"),
            ));
        }
        match command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => {
                return Err(ContractError::config_validation(
                    format!("helpers.{stage}"),
                    "helper command must start with a program",
                ));
            }
        }
    }
    Ok(())
}

fn validate_localized(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let localized = &blueprint.localized;
    if localized.normalize && localized.statistics_file.is_none() {
        return Err(ContractError::config_validation(
            "localized.statistics_file",
            "normalize = true requires a statistics file",
        ));
    }
    Ok(())
}

fn validate_container(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let Some(container) = &blueprint.execution.container else {
        return Ok(());
    };
    if container.engine.trim().is_empty() {
        return Err(ContractError::config_validation(
            "execution.container.engine",
            "container engine cannot be empty",
        ));
    }
    if container.image.trim().is_empty() {
        return Err(ContractError::config_validation(
            "execution.container.image",
            "container image cannot be empty",
        ));
    }
    Ok(())
}
