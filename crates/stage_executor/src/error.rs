//! Stage executor error types

use std::time::Duration;

use artifact_cache::CacheError;
use contracts::StageName;
use thiserror::Error;

/// Stage executor errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Invalid setup detected before any stage runs
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Predecessor output missing or not fresh
    #[error(
        "cannot start {}: {} is not run or failed, run it first",
        stage.display_name(),
        prerequisite.display_name()
    )]
    Prerequisite {
        stage: StageName,
        prerequisite: StageName,
    },

    /// Stage operation failed or did not produce its outputs
    #[error("failed running {}: {reason}", stage.display_name())]
    StageFailed { stage: StageName, reason: String },

    /// Sidecar bookkeeping failed
    #[error("metadata consistency error: {0}")]
    Cache(#[from] CacheError),
}

impl ExecutorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn stage_failed(stage: StageName, reason: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            reason: reason.into(),
        }
    }
}

/// Why a single invocation of a stage operation failed
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("could not start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with {status}")]
    ExitStatus { status: std::process::ExitStatus },

    #[error("process timed out after {}s and was killed", .0.as_secs())]
    TimedOut(Duration),

    #[error("function returned an error: {0}")]
    Function(String),

    #[error("function panicked")]
    Panicked,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage executor Result alias
pub type Result<T> = std::result::Result<T, ExecutorError>;
