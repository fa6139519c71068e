//! # Artifact Cache
//!
//! Metadata-gated validity checks for files produced by pipeline stages.
//!
//! Responsibilities:
//! - Decide whether an artifact is `Fresh`, `Missing` or `Stale`
//! - Persist the sidecar metadata record next to an artifact
//! - Discard an artifact together with its sidecar
//!
//! The cache knows nothing about stages or process invocation. All state lives
//! on disk in sidecar files, so decisions survive process restarts.
//!
//! # Example
//!
//! ```no_run
//! use artifact_cache::FileCache;
//! use contracts::{ArtifactMetadata, CacheDecision};
//! use std::path::Path;
//!
//! let cache = FileCache::default();
//! let metadata = ArtifactMetadata::new().with("backend", "3DI");
//! let path = Path::new("out/video_rects.3DI");
//! if cache.check(path, &metadata)? != CacheDecision::Fresh {
//!     // ... regenerate, then
//!     cache.store(path, &metadata)?;
//! }
//! # Ok::<(), artifact_cache::CacheError>(())
//! ```

mod cache;
mod error;
mod naming;
mod sidecar;

pub use cache::{CacheVerdict, CheckOptions, FileCache, StaleReason};
pub use error::{CacheError, Result};
pub use naming::propose_alternate_name;
pub use sidecar::{sidecar_path, Sidecar};
