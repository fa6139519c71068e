//! StageExecutor - cache-gated execution of a single stage
//!
//! For each stage: classify every declared output, skip when all are fresh,
//! otherwise discard the old outputs, run the operation, verify the outputs
//! exist, and record the producing configuration in their sidecars.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use artifact_cache::{CheckOptions, FileCache};
use chrono::TimeDelta;
use contracts::{ArtifactMetadata, CacheDecision, RetentionPeriod, StageName, StageParam};
use observability::StageStatus;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExecutorError, Result};
use crate::invoker::Invoker;
use crate::operation::StageOperation;

/// Base window within which a just-produced output must be observable
const VERIFICATION_WINDOW_MINUTES: i64 = 5;

/// Pipeline-wide values recorded in every sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Pipeline input as given by the caller
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

/// One stage ready for execution
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: StageName,
    pub operation: StageOperation,
    /// Positional params, passed to the operation in this order
    pub params: Vec<StageParam>,
    /// Stage-specific keys added to the pipeline metadata
    pub extra_metadata: ArtifactMetadata,
}

impl StageSpec {
    pub fn new(stage: StageName, operation: StageOperation, params: Vec<StageParam>) -> Self {
        Self {
            stage,
            operation,
            params,
            extra_metadata: ArtifactMetadata::new(),
        }
    }

    pub fn with_metadata(mut self, extra: ArtifactMetadata) -> Self {
        self.extra_metadata = extra;
        self
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.params.iter().filter_map(|p| match p {
            StageParam::Output(path) => Some(path.as_path()),
            _ => None,
        })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.params.iter().filter_map(|p| match p {
            StageParam::Input(path) => Some(path.as_path()),
            _ => None,
        })
    }
}

/// Lifecycle of a stage within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    SkippedFresh,
    DiscardedAndRunning,
    Running,
    Done,
    Failed,
}

/// Result of a successful stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Every output was fresh; nothing ran
    SkippedFresh { outputs: Vec<PathBuf> },
    /// Operation ran and its outputs were recorded
    Ran {
        outputs: Vec<PathBuf>,
        discarded: usize,
        elapsed: Duration,
    },
}

impl StageOutcome {
    pub fn outputs(&self) -> &[PathBuf] {
        match self {
            Self::SkippedFresh { outputs } | Self::Ran { outputs, .. } => outputs,
        }
    }

    pub fn ran(&self) -> bool {
        matches!(self, Self::Ran { .. })
    }
}

/// What happened to one stage during a run
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: StageName,
    /// Combined cache decision, once outputs were classified
    pub decision: Option<CacheDecision>,
    pub transitions: Vec<StageState>,
    pub discarded: usize,
    pub elapsed_secs: Option<f64>,
    pub error: Option<String>,
}

impl StageRecord {
    fn new(stage: StageName) -> Self {
        Self {
            stage,
            decision: None,
            transitions: vec![StageState::NotStarted],
            discarded: 0,
            elapsed_secs: None,
            error: None,
        }
    }

    fn transition(&mut self, state: StageState) {
        debug!(stage = %self.stage, from = ?self.state(), to = ?state, "Stage state changed");
        self.transitions.push(state);
    }

    /// Latest state
    pub fn state(&self) -> StageState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(StageState::NotStarted)
    }
}

/// Executes stages against a file cache
#[derive(Debug)]
pub struct StageExecutor {
    cache: FileCache,
    invoker: Invoker,
    base_metadata: ArtifactMetadata,
    context: RunContext,
    /// Outputs written during this run
    regenerated: HashSet<PathBuf>,
    records: Vec<StageRecord>,
}

impl StageExecutor {
    pub fn new(
        cache: FileCache,
        invoker: Invoker,
        base_metadata: ArtifactMetadata,
        context: RunContext,
    ) -> Self {
        Self {
            cache,
            invoker,
            base_metadata,
            context,
            regenerated: HashSet::new(),
            records: Vec::new(),
        }
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn base_metadata(&self) -> &ArtifactMetadata {
        &self.base_metadata
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Records of every stage executed so far, in order
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Whether `path` was written during this run
    pub fn was_regenerated(&self, path: &Path) -> bool {
        self.regenerated.contains(path)
    }

    /// Metadata a stage's outputs are compared against
    pub fn stage_metadata(&self, spec: &StageSpec) -> ArtifactMetadata {
        self.base_metadata.merged(&spec.extra_metadata)
    }

    /// Execute one stage
    ///
    /// # Errors
    /// `StageFailed` when the operation fails or an output is not produced,
    /// `Cache` when sidecar bookkeeping fails.
    #[instrument(name = "stage_execute", skip(self, spec), fields(stage = %spec.stage))]
    pub async fn execute(&mut self, spec: &StageSpec) -> Result<StageOutcome> {
        let mut record = StageRecord::new(spec.stage);
        let result = self.execute_inner(spec, &mut record).await;

        if let Err(e) = &result {
            record.transition(StageState::Failed);
            record.error = Some(e.to_string());
            observability::record_stage_outcome(spec.stage, StageStatus::Failed);
            warn!(stage = %spec.stage, error = %e, "Stage failed");
        }
        self.records.push(record);
        result
    }

    async fn execute_inner(
        &mut self,
        spec: &StageSpec,
        record: &mut StageRecord,
    ) -> Result<StageOutcome> {
        let stage = spec.stage;
        let outputs: Vec<PathBuf> = spec.outputs().map(Path::to_path_buf).collect();
        if outputs.is_empty() {
            return Err(ExecutorError::configuration(format!(
                "stage '{stage}' declares no outputs"
            )));
        }

        let metadata = self.stage_metadata(spec);
        let decision = self.decide(spec, &metadata, &outputs)?;
        record.decision = Some(decision);

        if decision.is_fresh() {
            record.transition(StageState::SkippedFresh);
            observability::record_stage_outcome(stage, StageStatus::Skipped);
            info!(stage = %stage, "Outputs of {} are up to date, skipping", stage.display_name());
            return Ok(StageOutcome::SkippedFresh { outputs });
        }

        // Co-produced outputs are never mixed across runs
        let mut discarded = 0;
        for output in &outputs {
            if self.cache.discard(output)? {
                discarded += 1;
                observability::record_artifact_discarded(stage);
            }
        }
        record.discarded = discarded;
        record.transition(if discarded > 0 {
            StageState::DiscardedAndRunning
        } else {
            StageState::Running
        });

        let cmd = self.invoker.command_line(&spec.operation, &spec.params);
        info!(stage = %stage, "Running {}...", stage.display_name());
        let started = Instant::now();
        let invoked = self.invoker.invoke(&spec.operation, &spec.params).await;
        let elapsed = started.elapsed();
        record.elapsed_secs = Some(elapsed.as_secs_f64());
        observability::record_stage_duration(stage, elapsed.as_secs_f64());
        invoked.map_err(|e| ExecutorError::stage_failed(stage, e.to_string()))?;

        let window = verification_options(elapsed);
        for output in &outputs {
            if !self.cache.check_with(output, &metadata, &window)?.is_fresh() {
                return Err(ExecutorError::stage_failed(
                    stage,
                    format!("declared output '{}' not produced", output.display()),
                ));
            }
        }

        let stored = metadata
            .with("cmd", cmd)
            .with("input", self.context.input.display().to_string())
            .with("output", self.context.output_dir.display().to_string());
        if let Err(e) = self.store_all(&outputs, &stored) {
            for output in &outputs {
                if let Err(cleanup) = self.cache.discard_sidecar(output) {
                    warn!(output = %output.display(), error = %cleanup, "Could not remove partial metadata");
                }
            }
            return Err(e);
        }

        self.regenerated.extend(outputs.iter().cloned());
        record.transition(StageState::Done);
        observability::record_stage_outcome(stage, StageStatus::Ran);
        info!(
            stage = %stage,
            elapsed_secs = elapsed.as_secs_f64(),
            "Finished {} (Took {:.2} secs)",
            stage.display_name(),
            elapsed.as_secs_f64()
        );

        Ok(StageOutcome::Ran {
            outputs,
            discarded,
            elapsed,
        })
    }

    fn store_all(&self, outputs: &[PathBuf], metadata: &ArtifactMetadata) -> Result<()> {
        for output in outputs {
            self.cache.store(output, metadata)?;
        }
        Ok(())
    }

    /// Combined decision of all outputs, forced stale by newer inputs
    fn decide(
        &self,
        spec: &StageSpec,
        metadata: &ArtifactMetadata,
        outputs: &[PathBuf],
    ) -> Result<CacheDecision> {
        let mut decisions = Vec::with_capacity(outputs.len());
        for output in outputs {
            decisions.push(self.cache.check(output, metadata)?);
        }
        let decision = CacheDecision::combine(decisions);

        if decision.is_fresh() {
            if let Some(input) = self.outdated_input(spec, outputs) {
                info!(
                    stage = %spec.stage,
                    input = %input.display(),
                    "Input is newer than the outputs, will be regenerated"
                );
                return Ok(CacheDecision::Stale);
            }
        }
        Ok(decision)
    }

    fn outdated_input<'a>(&self, spec: &'a StageSpec, outputs: &[PathBuf]) -> Option<&'a Path> {
        spec.inputs().find(|input| {
            if self.regenerated.contains(*input) {
                return true;
            }
            let Some(input_created) = self.cache.created_at(input) else {
                return false;
            };
            outputs.iter().any(|output| {
                self.cache
                    .created_at(output)
                    .is_some_and(|created| created < input_created)
            })
        })
    }
}

/// Post-run check policy: no sidecar needed, window grows with stage time
fn verification_options(elapsed: Duration) -> CheckOptions {
    let elapsed = TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero());
    let span = TimeDelta::minutes(VERIFICATION_WINDOW_MINUTES) + elapsed;
    CheckOptions {
        require_sidecar: false,
        retention: RetentionPeriod::from_span(
            format!("{} seconds", span.num_seconds()),
            span,
        ),
    }
}
