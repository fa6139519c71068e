//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the face pipeline.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Sidecar timestamps are local wall-clock time at second resolution
//! - Retention periods are calendar-aware (`months`/`years` follow the calendar)

mod blueprint;
mod decision;
mod error;
mod metadata;
mod retention;
mod stage;

pub use blueprint::*;
pub use decision::CacheDecision;
pub use error::*;
pub use metadata::{ArtifactMetadata, MetadataValue, CREATED_AT_KEY, SIDECAR_TIME_FORMAT};
pub use retention::RetentionPeriod;
pub use stage::{StageName, StageParam};
