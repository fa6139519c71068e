//! PipelineBlueprint - Config Loader output
//!
//! Describes one pipeline configuration: backend models, cache policy,
//! execution environment, optional stage features and helper bindings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::{ArtifactMetadata, RetentionPeriod, StageName};

/// Backend identifier recorded in every sidecar
pub const BACKEND_ID: &str = "3DI";

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PipelineBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Face backend models and installation
    #[serde(default)]
    #[validate(nested)]
    pub backend: BackendConfig,

    /// Artifact cache policy
    #[serde(default)]
    pub cache: CacheConfig,

    /// Process execution environment
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionConfig,

    /// Localized expression options
    #[serde(default)]
    pub localized: LocalizedConfig,

    /// Helper programs bound to in-process stages (program + leading args)
    #[serde(default)]
    pub helpers: BTreeMap<StageName, Vec<String>>,

    /// Default input/output (may be overridden from the command line)
    #[serde(default)]
    pub io: Option<IoConfig>,
}

/// Face backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Installation directory of the backend executables.
    /// When absent the caller must resolve it (environment, PATH search).
    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    /// Camera model (field of view or camera parameter file)
    #[serde(default = "default_camera_model")]
    #[validate(length(min = 1))]
    pub camera_model: String,

    /// Landmark model identifier
    #[serde(default = "default_landmark_model")]
    #[validate(length(min = 1))]
    pub landmark_model: String,

    /// Morphable model identifier
    #[serde(default = "default_morphable_model")]
    #[validate(length(min = 1))]
    pub morphable_model: String,

    /// Use the fast (less accurate) landmark configuration
    #[serde(default)]
    pub fast: bool,
}

fn default_camera_model() -> String {
    "30".to_string()
}

fn default_landmark_model() -> String {
    "global4".to_string()
}

fn default_morphable_model() -> String {
    "BFMmm-19830".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            install_dir: None,
            camera_model: default_camera_model(),
            landmark_model: default_landmark_model(),
            morphable_model: default_morphable_model(),
            fast: false,
        }
    }
}

impl BackendConfig {
    /// Metadata record identifying this configuration
    ///
    /// Identical across runs of the same configuration, hence comparable
    /// across invocations.
    pub fn metadata(&self) -> ArtifactMetadata {
        ArtifactMetadata::new()
            .with("backend", BACKEND_ID)
            .with("morphable_model", self.morphable_model.as_str())
            .with("camera", self.camera_model.as_str())
            .with("landmark", self.landmark_model.as_str())
            .with("fast", self.fast)
    }

    /// Landmark configuration id: 1 = accurate, 2 = fast
    pub fn config_id(&self) -> u8 {
        if self.fast {
            2
        } else {
            1
        }
    }
}

/// Artifact cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of a reusable artifact
    #[serde(default)]
    pub retention: RetentionPeriod,

    /// Treat artifacts without a sidecar as stale
    #[serde(default = "default_require_sidecar")]
    pub require_sidecar: bool,
}

fn default_require_sidecar() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPeriod::default(),
            require_sidecar: default_require_sidecar(),
        }
    }
}

/// Execution environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ExecutionConfig {
    /// Run the undistortion stage before face detection
    #[serde(default)]
    pub undistort: bool,

    /// Per-stage timeout for external processes (None = wait forever)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub stage_timeout_secs: Option<u64>,

    /// Run external executables inside a container
    #[serde(default)]
    pub container: Option<ContainerConfig>,
}

impl ExecutionConfig {
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

/// Containerized execution prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container engine executable
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Image reference (opaque)
    pub image: String,

    /// Extra arguments placed before the image (mounts, gpus, ...)
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_engine() -> String {
    "docker".to_string()
}

/// Localized expression options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalizedConfig {
    /// Normalize coefficients against precomputed per-basis statistics
    #[serde(default)]
    pub normalize: bool,

    /// Per-basis statistics file (required when `normalize` is set)
    #[serde(default)]
    pub statistics_file: Option<PathBuf>,
}

/// Input video and output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetadataValue;

    #[test]
    fn defaults_follow_backend_conventions() {
        let blueprint: PipelineBlueprint = toml::from_str("").unwrap();
        assert_eq!(blueprint.backend.camera_model, "30");
        assert_eq!(blueprint.backend.landmark_model, "global4");
        assert_eq!(blueprint.backend.morphable_model, "BFMmm-19830");
        assert!(!blueprint.backend.fast);
        assert!(blueprint.cache.require_sidecar);
        assert_eq!(blueprint.cache.retention.as_str(), "6 months");
        assert!(blueprint.execution.stage_timeout().is_none());
    }

    #[test]
    fn metadata_covers_configuration_fields() {
        let backend = BackendConfig {
            fast: true,
            ..Default::default()
        };
        let metadata = backend.metadata();
        assert_eq!(metadata.len(), 5);
        assert_eq!(metadata.get("backend"), Some(&MetadataValue::from("3DI")));
        assert_eq!(metadata.get("fast"), Some(&MetadataValue::Bool(true)));
        assert_eq!(backend.config_id(), 2);
    }

    #[test]
    fn helpers_are_keyed_by_stage() {
        let blueprint: PipelineBlueprint = toml::from_str(
            r#"
[helpers]
smooth_pose = ["python3", "-m", "smoothing.pose"]
"#,
        )
        .unwrap();
        assert_eq!(
            blueprint.helpers.get(&StageName::SmoothPose).map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn validator_rejects_empty_model_and_zero_timeout() {
        let mut blueprint = PipelineBlueprint::default();
        assert!(blueprint.validate().is_ok());

        blueprint.backend.morphable_model.clear();
        assert!(blueprint.validate().is_err());

        let mut blueprint = PipelineBlueprint::default();
        blueprint.execution.stage_timeout_secs = Some(0);
        assert!(blueprint.validate().is_err());
    }
}
