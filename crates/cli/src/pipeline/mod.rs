//! Pipeline assembly from configuration, CLI overrides and environment.

mod discovery;
mod orchestrator;
mod stats;

pub use orchestrator::{build_pipeline, load_blueprint, run_group};
pub use stats::RunStats;
