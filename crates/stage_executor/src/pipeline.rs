//! FacePipeline - the fixed 3DI face-analysis stage sequence
//!
//! Composes artifact paths from the input video, binds every stage to an
//! operation, enforces per-stage prerequisites and drives the executor.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use artifact_cache::{CacheVerdict, FileCache};
use contracts::{ArtifactMetadata, CacheDecision, PipelineBlueprint, StageName, StageParam};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{ExecutorError, Result};
use crate::executor::{RunContext, StageExecutor, StageOutcome, StageRecord, StageSpec, StageState};
use crate::invoker::Invoker;
use crate::operation::{FunctionRegistry, StageOperation};

/// Accepted input video extensions (case-insensitive)
pub const SUPPORTED_VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mpeg"];

/// Executable whose presence identifies a 3DI install directory
pub const PROBE_EXECUTABLE: &str = "video_learn_identity";

/// Stages run by [`FacePipeline::fit`]
const FIT_STAGES: [StageName; 6] = [
    StageName::FitIdentity,
    StageName::ShapeTexture,
    StageName::FitExpressionPose,
    StageName::SmoothExpression,
    StageName::SmoothPose,
    StageName::CanonicalizeLandmarks,
];

/// Artifact paths derived from the input video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelinePaths {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Input file name without its extension
    pub base: String,
    pub preprocessed: PathBuf,
    pub rects: PathBuf,
    pub landmarks: PathBuf,
    pub shape_coeff: PathBuf,
    pub texture_coeff: PathBuf,
    pub shape: PathBuf,
    pub texture: PathBuf,
    pub expression: PathBuf,
    pub pose: PathBuf,
    pub illumination: PathBuf,
    pub expression_smooth: PathBuf,
    pub pose_smooth: PathBuf,
    pub landmarks_canonicalized: PathBuf,
    pub expression_localized: PathBuf,
}

impl PipelinePaths {
    /// Name every artifact for `input`; touches nothing on disk
    ///
    /// # Errors
    /// `Configuration` when the input has no supported video extension.
    pub fn for_input(input: &Path, output_dir: &Path) -> Result<Self> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .filter(|e| SUPPORTED_VIDEO_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| {
                ExecutorError::configuration(format!(
                    "input file extension is not supported, use one of {SUPPORTED_VIDEO_EXTENSIONS:?}"
                ))
            })?;
        let base = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let artifact = |suffix: &str| output_dir.join(format!("{base}_{suffix}.3DI"));
        Ok(Self {
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            preprocessed: output_dir.join(format!("{base}_preprocessed.{ext}")),
            rects: artifact("rects"),
            landmarks: artifact("landmarks"),
            shape_coeff: artifact("shape_coeff"),
            texture_coeff: artifact("texture_coeff"),
            shape: artifact("shape"),
            texture: artifact("texture"),
            expression: artifact("expression"),
            pose: artifact("pose"),
            illumination: artifact("illumination"),
            expression_smooth: artifact("expression_smooth"),
            pose_smooth: artifact("pose_smooth"),
            landmarks_canonicalized: artifact("landmarks_canonicalized"),
            expression_localized: artifact("expression_localized"),
            base,
        })
    }

    /// Validate the input and create the output directory
    pub fn prepare(input: &Path, output_dir: &Path) -> Result<Self> {
        if !input.is_file() {
            return Err(ExecutorError::configuration(format!(
                "input file '{}' does not exist, check the path and permissions",
                input.display()
            )));
        }
        let paths = Self::for_input(input, output_dir)?;
        fs::create_dir_all(output_dir).map_err(|e| {
            ExecutorError::configuration(format!(
                "cannot create output directory '{}': {e}",
                output_dir.display()
            ))
        })?;
        Ok(paths)
    }
}

/// Landmark configuration file shipped with the backend
pub fn landmark_config_path(install_dir: &Path, blueprint: &PipelineBlueprint) -> PathBuf {
    let backend = &blueprint.backend;
    install_dir.join("configs").join(format!(
        "{}.cfg{}.{}.txt",
        backend.morphable_model,
        backend.config_id(),
        backend.landmark_model
    ))
}

/// Builder for [`FacePipeline`]
#[derive(Debug)]
pub struct FacePipelineBuilder {
    blueprint: PipelineBlueprint,
    install_dir: Option<PathBuf>,
    io: Option<(PathBuf, PathBuf)>,
    functions: FunctionRegistry,
}

impl FacePipelineBuilder {
    pub fn new(blueprint: PipelineBlueprint) -> Self {
        Self {
            blueprint,
            install_dir: None,
            io: None,
            functions: FunctionRegistry::new(),
        }
    }

    /// Resolved install directory; overrides the blueprint value
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    /// Input video and output directory; overrides the blueprint value
    pub fn io(mut self, input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.io = Some((input.into(), output_dir.into()));
        self
    }

    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Validate the environment and build the pipeline
    ///
    /// # Errors
    /// `Configuration` for a missing install directory, bad input, unset
    /// io, or normalization without a statistics file.
    #[instrument(name = "face_pipeline_build", skip(self))]
    pub fn build(self) -> Result<FacePipeline> {
        let blueprint = self.blueprint;

        let install_dir = self
            .install_dir
            .or_else(|| blueprint.backend.install_dir.clone())
            .ok_or_else(|| {
                ExecutorError::configuration(
                    "3DI install directory is not set, define PATH_3DI or backend.install_dir",
                )
            })?;
        if blueprint.execution.container.is_none() && !install_dir.join(PROBE_EXECUTABLE).exists() {
            return Err(ExecutorError::configuration(format!(
                "3DI package is not found in '{}'",
                install_dir.display()
            )));
        }

        let (input, output_dir) = self
            .io
            .or_else(|| {
                blueprint
                    .io
                    .as_ref()
                    .map(|io| (io.input.clone(), io.output_dir.clone()))
            })
            .ok_or_else(|| ExecutorError::configuration("input file and output directory are not set"))?;
        let paths = PipelinePaths::prepare(&input, &output_dir)?;

        if blueprint.localized.normalize && blueprint.localized.statistics_file.is_none() {
            return Err(ExecutorError::configuration(
                "localized.normalize requires localized.statistics_file",
            ));
        }

        let invoker = Invoker::new(&install_dir)
            .with_container(blueprint.execution.container.clone())
            .with_timeout(blueprint.execution.stage_timeout());
        let executor = StageExecutor::new(
            FileCache::from_config(&blueprint.cache),
            invoker,
            blueprint.backend.metadata(),
            RunContext {
                input: paths.input.clone(),
                output_dir: paths.output_dir.clone(),
            },
        );

        info!(
            install_dir = %install_dir.display(),
            input = %paths.input.display(),
            output_dir = %paths.output_dir.display(),
            "Face pipeline ready"
        );

        Ok(FacePipeline {
            landmark_config: landmark_config_path(&install_dir, &blueprint),
            blueprint,
            paths,
            functions: self.functions,
            executor,
        })
    }
}

/// Cache status of one output
#[derive(Debug, Clone, Serialize)]
pub struct OutputStatus {
    pub path: PathBuf,
    pub decision: CacheDecision,
    pub reason: Option<String>,
}

impl From<(PathBuf, CacheVerdict)> for OutputStatus {
    fn from((path, verdict): (PathBuf, CacheVerdict)) -> Self {
        Self {
            path,
            decision: verdict.decision,
            reason: verdict.reason.map(|r| r.to_string()),
        }
    }
}

/// Cache status of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageCacheStatus {
    pub stage: StageName,
    pub decision: CacheDecision,
    pub outputs: Vec<OutputStatus>,
}

/// Summary of the stages executed so far
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageRecord>,
}

impl PipelineReport {
    pub fn count(&self, state: StageState) -> usize {
        self.stages.iter().filter(|s| s.state() == state).count()
    }

    pub fn ran(&self) -> usize {
        self.count(StageState::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(StageState::SkippedFresh)
    }

    pub fn failed(&self) -> usize {
        self.count(StageState::Failed)
    }

    pub fn total_elapsed_secs(&self) -> f64 {
        self.stages.iter().filter_map(|s| s.elapsed_secs).sum()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.stages {
            let elapsed = record
                .elapsed_secs
                .map(|s| format!("{s:.2}s"))
                .unwrap_or_else(|| "-".to_string());
            write!(
                f,
                "{:<24} {:<22} {:>10}",
                record.stage.as_str(),
                format!("{:?}", record.state()),
                elapsed
            )?;
            if let Some(error) = &record.error {
                write!(f, "  {error}")?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "ran {}, reused {}, failed {} ({:.2}s)",
            self.ran(),
            self.skipped(),
            self.failed(),
            self.total_elapsed_secs()
        )
    }
}

/// The 3DI face-analysis pipeline for one input video
#[derive(Debug)]
pub struct FacePipeline {
    blueprint: PipelineBlueprint,
    paths: PipelinePaths,
    landmark_config: PathBuf,
    functions: FunctionRegistry,
    executor: StageExecutor,
}

impl FacePipeline {
    pub fn builder(blueprint: PipelineBlueprint) -> FacePipelineBuilder {
        FacePipelineBuilder::new(blueprint)
    }

    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    pub fn blueprint(&self) -> &PipelineBlueprint {
        &self.blueprint
    }

    pub fn landmark_config(&self) -> &Path {
        &self.landmark_config
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    /// Active stages in execution order
    pub fn stages(&self) -> Vec<StageName> {
        StageName::ALL
            .into_iter()
            .filter(|s| *s != StageName::Undistort || self.blueprint.execution.undistort)
            .collect()
    }

    /// Video consumed by the analysis stages
    fn video(&self) -> &Path {
        if self.blueprint.execution.undistort {
            &self.paths.preprocessed
        } else {
            &self.paths.input
        }
    }

    /// Positional params of `stage`
    pub fn stage_params(&self, stage: StageName) -> Vec<StageParam> {
        use StageParam as P;

        let p = &self.paths;
        let backend = &self.blueprint.backend;
        let video = || P::input(self.video());
        let config = || P::value(self.landmark_config.to_string_lossy());
        let camera = || P::value(&backend.camera_model);
        let model = || P::value(&backend.morphable_model);

        match stage {
            StageName::Undistort => vec![P::input(&p.input), camera(), P::output(&p.preprocessed)],
            StageName::DetectFaces => vec![video(), P::output(&p.rects)],
            StageName::DetectLandmarks => vec![
                video(),
                P::input(&p.rects),
                P::output(&p.landmarks),
                config(),
            ],
            StageName::FitIdentity => vec![
                video(),
                P::input(&p.landmarks),
                config(),
                camera(),
                P::output(&p.shape_coeff),
                P::output(&p.texture_coeff),
            ],
            StageName::ShapeTexture => vec![
                P::input(&p.shape_coeff),
                P::input(&p.texture_coeff),
                P::output(&p.shape),
                P::output(&p.texture),
                model(),
            ],
            StageName::FitExpressionPose => vec![
                video(),
                P::input(&p.landmarks),
                config(),
                camera(),
                P::input(&p.shape),
                P::input(&p.texture),
                P::output(&p.expression),
                P::output(&p.pose),
                P::output(&p.illumination),
            ],
            StageName::SmoothExpression => vec![
                P::input(&p.expression),
                P::output(&p.expression_smooth),
                model(),
            ],
            StageName::SmoothPose => vec![P::input(&p.pose), P::output(&p.pose_smooth)],
            StageName::CanonicalizeLandmarks => vec![
                P::input(&p.expression_smooth),
                P::output(&p.landmarks_canonicalized),
                model(),
            ],
            StageName::LocalizedExpressions => {
                let mut params = vec![
                    P::input(&p.landmarks_canonicalized),
                    P::output(&p.expression_localized),
                    model(),
                ];
                if let Some(stats) = self.normalization_statistics() {
                    params.push(P::input(stats));
                }
                params
            }
        }
    }

    fn normalization_statistics(&self) -> Option<&Path> {
        let localized = &self.blueprint.localized;
        localized
            .statistics_file
            .as_deref()
            .filter(|_| localized.normalize)
    }

    /// Stage-specific metadata keys
    pub fn stage_metadata(&self, stage: StageName) -> ArtifactMetadata {
        let mut extra = ArtifactMetadata::new();
        if stage == StageName::LocalizedExpressions && self.blueprint.localized.normalize {
            extra.insert("normalize", true);
        }
        extra
    }

    /// Operation bound to `stage`
    ///
    /// # Errors
    /// `Configuration` for an in-process stage with neither a helper
    /// program nor a registered function.
    pub fn operation(&self, stage: StageName) -> Result<StageOperation> {
        let bundled = match stage {
            StageName::Undistort => Some("video_undistort"),
            StageName::DetectFaces => Some("video_detect_face"),
            StageName::DetectLandmarks => Some("video_detect_landmarks"),
            StageName::FitIdentity => Some(PROBE_EXECUTABLE),
            StageName::FitExpressionPose => Some("video_from_saved_identity"),
            _ => None,
        };
        if let Some(executable) = bundled {
            return Ok(StageOperation::bundled(executable));
        }

        if let Some((program, args)) = self
            .blueprint
            .helpers
            .get(&stage)
            .and_then(|helper| helper.split_first())
        {
            return Ok(StageOperation::system(program.clone(), args.to_vec()));
        }

        self.functions.operation(stage).ok_or_else(|| {
            ExecutorError::configuration(format!(
                "no implementation bound to stage '{stage}', register a function or configure helpers.{stage}"
            ))
        })
    }

    pub fn stage_spec(&self, stage: StageName) -> Result<StageSpec> {
        Ok(
            StageSpec::new(stage, self.operation(stage)?, self.stage_params(stage))
                .with_metadata(self.stage_metadata(stage)),
        )
    }

    /// Stage producing the primary input of `stage`, with that input
    pub fn prerequisite(&self, stage: StageName) -> Option<(StageName, &Path)> {
        let p = &self.paths;
        match stage {
            StageName::Undistort => None,
            StageName::DetectFaces => self
                .blueprint
                .execution
                .undistort
                .then_some((StageName::Undistort, p.preprocessed.as_path())),
            StageName::DetectLandmarks => Some((StageName::DetectFaces, p.rects.as_path())),
            StageName::FitIdentity => Some((StageName::DetectLandmarks, p.landmarks.as_path())),
            StageName::ShapeTexture => Some((StageName::FitIdentity, p.shape_coeff.as_path())),
            StageName::FitExpressionPose => Some((StageName::ShapeTexture, p.shape.as_path())),
            StageName::SmoothExpression => Some((StageName::FitExpressionPose, p.expression.as_path())),
            StageName::SmoothPose => Some((StageName::FitExpressionPose, p.pose.as_path())),
            StageName::CanonicalizeLandmarks => {
                Some((StageName::SmoothExpression, p.expression_smooth.as_path()))
            }
            StageName::LocalizedExpressions => {
                Some((StageName::CanonicalizeLandmarks, p.landmarks_canonicalized.as_path()))
            }
        }
    }

    fn check_prerequisite(&self, stage: StageName) -> Result<()> {
        let Some((prerequisite, path)) = self.prerequisite(stage) else {
            return Ok(());
        };
        let metadata = self.executor.base_metadata().merged(&self.stage_metadata(prerequisite));
        if self.executor.cache().check(path, &metadata)?.is_fresh() {
            Ok(())
        } else {
            Err(ExecutorError::Prerequisite {
                stage,
                prerequisite,
            })
        }
    }

    /// Fail early when any of `stages` has no operation
    pub fn check_bindings(&self, stages: &[StageName]) -> Result<()> {
        for stage in stages {
            self.operation(*stage)?;
        }
        Ok(())
    }

    async fn run_stages(&mut self, stages: &[StageName]) -> Result<Vec<StageOutcome>> {
        self.check_bindings(stages)?;

        let mut outcomes = Vec::with_capacity(stages.len());
        for &stage in stages {
            self.check_prerequisite(stage)?;
            let spec = self.stage_spec(stage)?;
            outcomes.push(self.executor.execute(&spec).await?);
        }
        Ok(outcomes)
    }

    /// Undistort the input video when enabled
    pub async fn preprocess(&mut self) -> Result<Vec<StageOutcome>> {
        if !self.blueprint.execution.undistort {
            info!("Undistortion disabled, using input video as is");
            return Ok(Vec::new());
        }
        self.run_stages(&[StageName::Undistort]).await
    }

    pub async fn detect_faces(&mut self) -> Result<StageOutcome> {
        self.run_single(StageName::DetectFaces).await
    }

    pub async fn detect_landmarks(&mut self) -> Result<StageOutcome> {
        self.run_single(StageName::DetectLandmarks).await
    }

    /// Identity, expression and pose fitting through canonical landmarks
    pub async fn fit(&mut self) -> Result<Vec<StageOutcome>> {
        self.run_stages(&FIT_STAGES).await
    }

    pub async fn localized_expressions(&mut self) -> Result<StageOutcome> {
        self.run_single(StageName::LocalizedExpressions).await
    }

    async fn run_single(&mut self, stage: StageName) -> Result<StageOutcome> {
        let mut outcomes = self.run_stages(&[stage]).await?;
        outcomes
            .pop()
            .ok_or_else(|| ExecutorError::stage_failed(stage, "stage produced no outcome"))
    }

    /// Run every active stage in order
    ///
    /// Every stage binding is checked before the first stage starts.
    #[instrument(name = "face_pipeline_run_all", skip(self), fields(input = %self.paths.input.display()))]
    pub async fn run_all(&mut self) -> Result<PipelineReport> {
        let stages = self.stages();
        self.run_stages(&stages).await?;
        let report = self.report();
        info!(
            ran = report.ran(),
            reused = report.skipped(),
            "Pipeline finished"
        );
        Ok(report)
    }

    /// Records of every stage executed so far
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            stages: self.executor.records().to_vec(),
        }
    }

    /// Cache verdict of every active stage; runs nothing
    pub fn status(&self) -> Result<Vec<StageCacheStatus>> {
        let cache = self.executor.cache();
        let mut statuses = Vec::new();
        for stage in self.stages() {
            let metadata = self.executor.base_metadata().merged(&self.stage_metadata(stage));
            let mut outputs = Vec::new();
            for param in self.stage_params(stage) {
                if let StageParam::Output(path) = param {
                    let verdict = cache.inspect(&path, &metadata, cache.options())?;
                    outputs.push(OutputStatus::from((path, verdict)));
                }
            }
            statuses.push(StageCacheStatus {
                stage,
                decision: CacheDecision::combine(outputs.iter().map(|o| o.decision)),
                outputs,
            });
        }
        Ok(statuses)
    }
}
