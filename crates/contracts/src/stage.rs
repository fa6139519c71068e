//! Stage identifiers and stage parameters

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ContractError;

/// The fixed stages of the face-analysis pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Undistort,
    DetectFaces,
    DetectLandmarks,
    FitIdentity,
    ShapeTexture,
    FitExpressionPose,
    SmoothExpression,
    SmoothPose,
    CanonicalizeLandmarks,
    LocalizedExpressions,
}

impl StageName {
    /// All stages in pipeline order
    pub const ALL: [StageName; 10] = [
        StageName::Undistort,
        StageName::DetectFaces,
        StageName::DetectLandmarks,
        StageName::FitIdentity,
        StageName::ShapeTexture,
        StageName::FitExpressionPose,
        StageName::SmoothExpression,
        StageName::SmoothPose,
        StageName::CanonicalizeLandmarks,
        StageName::LocalizedExpressions,
    ];

    /// Stages backed by an in-process function unless overridden by a helper program
    pub const FUNCTION_STAGES: [StageName; 5] = [
        StageName::ShapeTexture,
        StageName::SmoothExpression,
        StageName::SmoothPose,
        StageName::CanonicalizeLandmarks,
        StageName::LocalizedExpressions,
    ];

    /// Stable identifier (used in config keys, logs and metric labels)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undistort => "undistort",
            Self::DetectFaces => "detect_faces",
            Self::DetectLandmarks => "detect_landmarks",
            Self::FitIdentity => "fit_identity",
            Self::ShapeTexture => "shape_texture",
            Self::FitExpressionPose => "fit_expression_pose",
            Self::SmoothExpression => "smooth_expression",
            Self::SmoothPose => "smooth_pose",
            Self::CanonicalizeLandmarks => "canonicalize_landmarks",
            Self::LocalizedExpressions => "localized_expressions",
        }
    }

    /// Human-readable name used in progress output and errors
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Undistort => "video undistortion",
            Self::DetectFaces => "face detection",
            Self::DetectLandmarks => "landmark detection",
            Self::FitIdentity => "3D face model fitting",
            Self::ShapeTexture => "shape and texture model",
            Self::FitExpressionPose => "expression and pose estimation",
            Self::SmoothExpression => "expression smoothing",
            Self::SmoothPose => "pose smoothing",
            Self::CanonicalizeLandmarks => "canonicalized landmark estimation",
            Self::LocalizedExpressions => "localized expression estimation",
        }
    }

    pub fn is_function_stage(self) -> bool {
        Self::FUNCTION_STAGES.contains(&self)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ContractError::Other(format!("unknown stage '{s}'")))
    }
}

/// One positional parameter of a stage invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StageParam {
    /// File consumed by the stage
    Input(PathBuf),
    /// File the stage claims to produce; its validity gates the stage
    Output(PathBuf),
    /// Plain argument (model identifier, camera parameters, ...)
    Value(String),
}

impl StageParam {
    pub fn input(path: impl Into<PathBuf>) -> Self {
        Self::Input(path.into())
    }

    pub fn output(path: impl Into<PathBuf>) -> Self {
        Self::Output(path.into())
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    /// Path of an `Input` or `Output` parameter
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Input(p) | Self::Output(p) => Some(p),
            Self::Value(_) => None,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }

    /// Command-line form of the parameter
    pub fn as_arg(&self) -> OsString {
        match self {
            Self::Input(p) | Self::Output(p) => p.as_os_str().to_owned(),
            Self::Value(v) => OsString::from(v),
        }
    }
}

impl fmt::Display for StageParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(p) | Self::Output(p) => write!(f, "{}", p.display()),
            Self::Value(v) => f.write_str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip_through_str() {
        for stage in StageName::ALL {
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), stage);
        }
        assert!("warp_drive".parse::<StageName>().is_err());
    }

    #[test]
    fn order_matches_pipeline_sequence() {
        let mut sorted = StageName::ALL;
        sorted.sort();
        assert_eq!(sorted, StageName::ALL);
    }

    #[test]
    fn params_render_as_arguments() {
        assert_eq!(StageParam::value("30").as_arg(), OsString::from("30"));
        assert_eq!(
            StageParam::output("/out/a_rects.3DI").to_string(),
            "/out/a_rects.3DI"
        );
        assert!(StageParam::output("x").is_output());
        assert!(StageParam::value("x").path().is_none());
    }
}
