//! Sidecar metadata files
//!
//! A sidecar lives at the artifact path with its extension replaced by
//! `.json` and holds the producing configuration plus a `createdAt` stamp.

use chrono::NaiveDateTime;
use contracts::{ArtifactMetadata, CREATED_AT_KEY, SIDECAR_TIME_FORMAT};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};

/// Sidecar path of an artifact
///
/// # Errors
/// `SidecarCollision` when the artifact itself has a `.json` extension.
pub fn sidecar_path(artifact: &Path) -> Result<PathBuf> {
    let is_json = artifact
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        return Err(CacheError::SidecarCollision {
            path: artifact.to_path_buf(),
        });
    }
    Ok(artifact.with_extension("json"))
}

/// Parsed sidecar content
#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    fields: Map<String, Value>,
}

impl Sidecar {
    /// Sidecar for `metadata` stamped with `created_at`
    pub fn new(metadata: &ArtifactMetadata, created_at: NaiveDateTime) -> Self {
        let mut fields = metadata.to_json_map();
        fields.insert(
            CREATED_AT_KEY.to_string(),
            Value::String(created_at.format(SIDECAR_TIME_FORMAT).to_string()),
        );
        Self { fields }
    }

    /// Parse sidecar JSON; anything but a JSON object is rejected
    pub fn parse(content: &str) -> std::result::Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_str(content)?;
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Persistence timestamp, if present and well-formed
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.fields
            .get(CREATED_AT_KEY)
            .and_then(Value::as_str)
            .and_then(|s| NaiveDateTime::parse_from_str(s, SIDECAR_TIME_FORMAT).ok())
    }

    /// Pretty JSON with four-space indentation
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.fields.serialize(&mut serializer)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn sidecar_path_replaces_extension() {
        assert_eq!(
            sidecar_path(Path::new("/out/clip_rects.3DI")).unwrap(),
            PathBuf::from("/out/clip_rects.json")
        );
        assert_eq!(
            sidecar_path(Path::new("/out/clip.v2_pose.3DI")).unwrap(),
            PathBuf::from("/out/clip.v2_pose.json")
        );
        assert_eq!(
            sidecar_path(Path::new("/out/noext")).unwrap(),
            PathBuf::from("/out/noext.json")
        );
    }

    #[test]
    fn json_artifact_collides_with_sidecar() {
        let err = sidecar_path(Path::new("/out/report.JSON")).unwrap_err();
        assert!(matches!(err, CacheError::SidecarCollision { .. }));
    }

    #[test]
    fn created_at_uses_second_resolution_format() {
        let metadata = ArtifactMetadata::new().with("backend", "3DI");
        let sidecar = Sidecar::new(&metadata, timestamp());
        assert_eq!(
            sidecar.get(CREATED_AT_KEY),
            Some(&Value::String("2024-03-09 14:05:07".into()))
        );
        assert_eq!(sidecar.created_at(), Some(timestamp()));

        let text = String::from_utf8(sidecar.to_json_bytes().unwrap()).unwrap();
        assert!(text.contains("\n    \"backend\": \"3DI\""), "got: {text}");
        assert_eq!(Sidecar::parse(&text).unwrap(), sidecar);
    }

    #[test]
    fn malformed_timestamp_reads_as_absent() {
        let sidecar = Sidecar::parse(r#"{"createdAt": "yesterday"}"#).unwrap();
        assert!(sidecar.created_at().is_none());
    }

    #[test]
    fn non_object_sidecar_is_rejected() {
        assert!(Sidecar::parse("[1, 2]").is_err());
        assert!(Sidecar::parse("not json").is_err());
    }
}
