//! Artifact cache errors

use std::path::PathBuf;
use thiserror::Error;

/// Artifact cache errors
///
/// Every variant except `Io`/`Serialize` is a metadata consistency failure:
/// the filesystem does not reflect an operation that reported success.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Artifact path has no distinct sidecar path (artifact is itself `.json`)
    #[error("artifact '{}' collides with its own sidecar path", path.display())]
    SidecarCollision { path: PathBuf },

    /// Sidecar was written but cannot be observed on disk
    #[error("metadata file for '{}' could not be created", path.display())]
    SidecarNotPersisted { path: PathBuf },

    /// File is still observable after deletion
    #[error("'{}' could not be deleted: {reason}", path.display())]
    DiscardFailed { path: PathBuf, reason: String },

    /// Sidecar serialization error
    #[error("sidecar serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn discard_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DiscardFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Artifact cache Result alias
pub type Result<T> = std::result::Result<T, CacheError>;
