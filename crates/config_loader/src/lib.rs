//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `PipelineBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("pipeline.toml")).unwrap();
//! println!("Retention: {}", blueprint.cache.retention);
//! ```

mod parser;
mod validator;

pub use contracts::PipelineBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<PipelineBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<PipelineBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Validate an already constructed blueprint (e.g. after CLI overrides)
    pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
        validator::validate(blueprint)
    }

    /// Serialize PipelineBlueprint to TOML string
    pub fn to_toml(blueprint: &PipelineBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize PipelineBlueprint to JSON string
    pub fn to_json(blueprint: &PipelineBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StageName;

    const PIPELINE_TOML: &str = r#"
[backend]
install_dir = "/opt/3DI/build"
camera_model = "30"
fast = true

[cache]
retention = "1 year 2 weeks"

[execution]
undistort = true
stage_timeout_secs = 3600

[helpers]
smooth_pose = ["python3", "-m", "bitbox_helpers.smooth_pose"]
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(PIPELINE_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert!(bp.backend.fast);
        assert_eq!(bp.backend.morphable_model, "BFMmm-19830");
        assert_eq!(bp.cache.retention.as_str(), "1 year 2 weeks");
        assert!(bp.cache.require_sidecar);
        assert_eq!(bp.helpers[&StageName::SmoothPose][0], "python3");
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(PIPELINE_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.cache.retention, bp2.cache.retention);
        assert_eq!(bp.execution.stage_timeout_secs, bp2.execution.stage_timeout_secs);
        assert_eq!(bp.helpers, bp2.helpers);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(PIPELINE_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.backend.install_dir, bp2.backend.install_dir);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let content = r#"
[helpers]
detect_faces = ["./my_detector"]
"#;
        let result = ConfigLoader::load_from_str(content, ConfigFormat::Toml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("in-process"));
    }

    #[test]
    fn test_load_from_path_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, PIPELINE_TOML).unwrap();
        assert!(ConfigLoader::load_from_path(&path).is_ok());

        let yaml = dir.path().join("pipeline.yaml");
        std::fs::write(&yaml, "backend: {}").unwrap();
        assert!(ConfigLoader::load_from_path(&yaml).is_err());
    }
}
