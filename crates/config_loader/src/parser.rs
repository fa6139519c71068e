//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{ContractError, PipelineBlueprint};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<PipelineBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<PipelineBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<PipelineBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let bp = parse_toml("").unwrap();
        assert_eq!(bp.backend.landmark_model, "global4");
        assert!(bp.execution.container.is_none());
        assert!(bp.io.is_none());
    }

    #[test]
    fn test_parse_json_container() {
        let content = r#"{
            "backend": { "install_dir": "/app/build" },
            "execution": {
                "container": { "image": "example/3di:cuda", "args": ["--gpus", "all"] }
            },
            "io": { "input": "/data/clip.mp4", "output_dir": "/data/out" }
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let container = result.unwrap().execution.container.unwrap();
        assert_eq!(container.engine, "docker");
        assert_eq!(container.args.len(), 2);
    }

    #[test]
    fn test_parse_bad_retention() {
        let err = parse_toml("[cache]\nretention = \"6 fortnights\"").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
        assert!(err.to_string().contains("fortnights"));
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
