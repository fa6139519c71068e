//! FileCache - freshness decisions and sidecar persistence

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use contracts::{ArtifactMetadata, CacheConfig, CacheDecision, RetentionPeriod};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::sidecar::{sidecar_path, Sidecar};

/// Per-call check policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOptions {
    /// Treat an artifact without sidecar as stale
    pub require_sidecar: bool,
    /// Maximum age of a content-valid artifact
    pub retention: RetentionPeriod,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            require_sidecar: true,
            retention: RetentionPeriod::default(),
        }
    }
}

/// Why an existing artifact was judged stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    NoSidecar,
    UnreadableSidecar { message: String },
    MetadataMismatch { key: String },
    NoTimestamp,
    Expired { age: TimeDelta },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSidecar => write!(f, "no metadata file"),
            Self::UnreadableSidecar { message } => {
                write!(f, "metadata file is unreadable: {message}")
            }
            Self::MetadataMismatch { key } => {
                write!(f, "metadata key '{key}' differs from current settings")
            }
            Self::NoTimestamp => write!(f, "creation time unknown"),
            Self::Expired { age } => {
                write!(f, "older than retention period ({} days)", age.num_days())
            }
        }
    }
}

/// Decision plus the reason for a `Stale` verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVerdict {
    pub decision: CacheDecision,
    pub reason: Option<StaleReason>,
}

impl CacheVerdict {
    fn fresh() -> Self {
        Self {
            decision: CacheDecision::Fresh,
            reason: None,
        }
    }

    fn missing() -> Self {
        Self {
            decision: CacheDecision::Missing,
            reason: None,
        }
    }

    fn stale(reason: StaleReason) -> Self {
        Self {
            decision: CacheDecision::Stale,
            reason: Some(reason),
        }
    }
}

/// File-backed artifact cache
///
/// Holds no state besides its default policy; every decision is derived from
/// the artifact and its sidecar on disk.
#[derive(Debug, Clone, Default)]
pub struct FileCache {
    options: CheckOptions,
}

impl FileCache {
    pub fn new(options: CheckOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(CheckOptions {
            require_sidecar: config.require_sidecar,
            retention: config.retention.clone(),
        })
    }

    /// Default policy used by [`FileCache::check`]
    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Classify `path` under the default policy
    pub fn check(&self, path: &Path, metadata: &ArtifactMetadata) -> Result<CacheDecision> {
        self.check_with(path, metadata, &self.options)
    }

    /// Classify `path` under an explicit policy
    pub fn check_with(
        &self,
        path: &Path,
        metadata: &ArtifactMetadata,
        options: &CheckOptions,
    ) -> Result<CacheDecision> {
        Ok(self.inspect(path, metadata, options)?.decision)
    }

    /// Classify `path` and report why it is stale
    pub fn inspect(
        &self,
        path: &Path,
        metadata: &ArtifactMetadata,
        options: &CheckOptions,
    ) -> Result<CacheVerdict> {
        self.inspect_at(path, metadata, options, Local::now().naive_local())
    }

    /// [`FileCache::inspect`] evaluated at a fixed instant
    pub fn inspect_at(
        &self,
        path: &Path,
        metadata: &ArtifactMetadata,
        options: &CheckOptions,
        now: NaiveDateTime,
    ) -> Result<CacheVerdict> {
        let verdict = self.evaluate(path, metadata, options, now)?;
        observability::record_cache_decision(verdict.decision);

        match &verdict.reason {
            None if verdict.decision == CacheDecision::Missing => {
                debug!(path = %path.display(), "File does not exist, will be created");
            }
            None => {
                debug!(path = %path.display(), "File exists and is up to date, reusing");
            }
            Some(reason) => {
                info!(path = %path.display(), %reason, "File is stale, will be regenerated");
            }
        }
        Ok(verdict)
    }

    fn evaluate(
        &self,
        path: &Path,
        metadata: &ArtifactMetadata,
        options: &CheckOptions,
        now: NaiveDateTime,
    ) -> Result<CacheVerdict> {
        if !path.exists() {
            return Ok(CacheVerdict::missing());
        }
        let sidecar = sidecar_path(path)?;

        if !sidecar.exists() {
            if options.require_sidecar {
                return Ok(CacheVerdict::stale(StaleReason::NoSidecar));
            }
            return Ok(match filesystem_created_at(path) {
                Some(created) => within_retention(created, now, &options.retention),
                None => CacheVerdict::stale(StaleReason::NoTimestamp),
            });
        }

        let stored = match read_sidecar(&sidecar) {
            Ok(stored) => stored,
            Err(message) => {
                warn!(
                    sidecar = %sidecar.display(),
                    error = %message,
                    "Could not read metadata file"
                );
                return Ok(CacheVerdict::stale(StaleReason::UnreadableSidecar { message }));
            }
        };

        if let Some(key) = metadata.first_mismatch(stored.fields()) {
            return Ok(CacheVerdict::stale(StaleReason::MetadataMismatch {
                key: key.to_string(),
            }));
        }

        Ok(match stored.created_at() {
            Some(created) => within_retention(created, now, &options.retention),
            None => CacheVerdict::stale(StaleReason::NoTimestamp),
        })
    }

    /// Record `metadata` as the producing configuration of `path`
    pub fn store(&self, path: &Path, metadata: &ArtifactMetadata) -> Result<()> {
        self.store_at(path, metadata, Local::now().naive_local())
    }

    /// [`FileCache::store`] with an explicit `createdAt`
    pub fn store_at(
        &self,
        path: &Path,
        metadata: &ArtifactMetadata,
        created_at: NaiveDateTime,
    ) -> Result<()> {
        let sidecar = sidecar_path(path)?;
        let bytes = Sidecar::new(metadata, created_at).to_json_bytes()?;
        fs::write(&sidecar, bytes)?;

        if !sidecar.exists() {
            return Err(CacheError::SidecarNotPersisted { path: sidecar });
        }
        debug!(sidecar = %sidecar.display(), "Metadata file written");
        Ok(())
    }

    /// Delete `path` and its sidecar, each if present
    ///
    /// Returns whether anything was removed.
    pub fn discard(&self, path: &Path) -> Result<bool> {
        let removed_artifact = remove_verified(path)?;
        let removed_sidecar = self.discard_sidecar(path)?;
        Ok(removed_artifact || removed_sidecar)
    }

    /// Delete only the sidecar of `path`
    pub fn discard_sidecar(&self, path: &Path) -> Result<bool> {
        remove_verified(&sidecar_path(path)?)
    }

    /// Sidecar of `path`, `None` when absent
    ///
    /// # Errors
    /// `Serialize` when the sidecar exists but is not a JSON object.
    pub fn load_sidecar(&self, path: &Path) -> Result<Option<Sidecar>> {
        let sidecar = sidecar_path(path)?;
        match fs::read_to_string(&sidecar) {
            Ok(content) => Ok(Some(Sidecar::parse(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `createdAt` recorded in the sidecar of `path`
    pub fn created_at(&self, path: &Path) -> Option<NaiveDateTime> {
        self.load_sidecar(path).ok().flatten()?.created_at()
    }
}

fn within_retention(
    created: NaiveDateTime,
    now: NaiveDateTime,
    retention: &RetentionPeriod,
) -> CacheVerdict {
    let age = now - created;
    if retention.is_exceeded_by(age) {
        CacheVerdict::stale(StaleReason::Expired { age })
    } else {
        CacheVerdict::fresh()
    }
}

fn read_sidecar(sidecar: &Path) -> std::result::Result<Sidecar, String> {
    let content = fs::read_to_string(sidecar).map_err(|e| e.to_string())?;
    Sidecar::parse(&content).map_err(|e| e.to_string())
}

/// Birth time where the platform records it, else modification time
fn filesystem_created_at(path: &Path) -> Option<NaiveDateTime> {
    let meta = fs::metadata(path).ok()?;
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(DateTime::<Local>::from(time).naive_local())
}

fn remove_verified(path: &Path) -> Result<bool> {
    let removed = match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(CacheError::discard_failed(path, e.to_string())),
    };
    if path.exists() {
        return Err(CacheError::discard_failed(path, "file still exists"));
    }
    Ok(removed)
}
