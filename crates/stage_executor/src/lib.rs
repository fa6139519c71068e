//! # Stage Executor
//!
//! Cache-gated execution of the 3DI face-analysis pipeline.
//!
//! Responsibilities:
//! - Skip a stage when every declared output is fresh
//! - Discard stale outputs, run the stage operation, verify and record outputs
//! - Enforce stage prerequisites and the fixed stage order
//!
//! Stages run strictly one after another. Processes are awaited on tokio so
//! that a per-stage timeout can kill a hung child.

pub mod error;
pub mod executor;
pub mod invoker;
pub mod operation;
pub mod pipeline;

pub use error::{ExecutorError, InvokeError, Result};
pub use executor::{RunContext, StageExecutor, StageOutcome, StageRecord, StageSpec, StageState};
pub use invoker::Invoker;
pub use operation::{Executable, FunctionRegistry, StageFn, StageOperation};
pub use pipeline::{
    landmark_config_path, FacePipeline, FacePipelineBuilder, OutputStatus, PipelinePaths,
    PipelineReport, StageCacheStatus, PROBE_EXECUTABLE, SUPPORTED_VIDEO_EXTENSIONS,
};
