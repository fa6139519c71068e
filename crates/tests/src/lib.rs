//! # Integration Tests
//!
//! End-to-end tests of the face pipeline against a fake 3DI install made of
//! shell scripts. Every script appends its name to `calls.log` in its
//! working directory, which is the install directory.

#[cfg(test)]
mod contract_tests {
    use contracts::{CacheDecision, RetentionPeriod, StageName};

    #[test]
    fn test_contract_defaults() {
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(RetentionPeriod::default().span().num_days(), 181);
        assert!(CacheDecision::Fresh < CacheDecision::Missing);
        assert!(CacheDecision::Missing < CacheDecision::Stale);
        assert_eq!(StageName::ALL.len(), 10);
    }
}

#[cfg(all(test, unix))]
mod fixture {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use contracts::{PipelineBlueprint, StageName, StageParam};
    use stage_executor::{FacePipeline, FunctionRegistry};
    use tempfile::TempDir;

    pub struct Workspace {
        pub dir: TempDir,
        pub install: PathBuf,
        pub input: PathBuf,
        pub output: PathBuf,
        pub function_calls: Arc<AtomicUsize>,
    }

    pub fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\necho {name} >> calls.log\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    impl Workspace {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let install = dir.path().join("3DI");
            fs::create_dir_all(install.join("configs")).unwrap();

            write_script(&install, "video_undistort", r#"cp "$1" "$3""#);
            write_script(&install, "video_detect_face", r#"echo rects > "$2""#);
            write_script(&install, "video_detect_landmarks", r#"echo "landmarks $4" > "$3""#);
            write_script(
                &install,
                "video_learn_identity",
                r#"echo shape > "$5"; echo texture > "$6""#,
            );
            write_script(
                &install,
                "video_from_saved_identity",
                r#"echo exp > "$7"; echo pose > "$8"; echo illum > "$9""#,
            );

            let input = dir.path().join("session01.mp4");
            fs::write(&input, b"not really a video").unwrap();
            let output = dir.path().join("out");

            Self {
                install,
                input,
                output,
                function_calls: Arc::new(AtomicUsize::new(0)),
                dir,
            }
        }

        /// Names of the 3DI executables invoked so far
        pub fn calls(&self) -> Vec<String> {
            fs::read_to_string(self.install.join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        pub fn function_calls(&self) -> usize {
            self.function_calls.load(Ordering::SeqCst)
        }

        /// Registry binding every in-process stage to an output writer
        pub fn registry(&self) -> FunctionRegistry {
            let mut registry = FunctionRegistry::new();
            for stage in StageName::FUNCTION_STAGES {
                let calls = Arc::clone(&self.function_calls);
                registry.register(stage, stage.as_str(), move |params: &[StageParam]| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    for param in params {
                        if let StageParam::Output(path) = param {
                            fs::write(path, format!("{stage}\n"))?;
                        }
                    }
                    Ok(())
                });
            }
            registry
        }

        pub fn pipeline(&self, blueprint: PipelineBlueprint) -> FacePipeline {
            FacePipeline::builder(blueprint)
                .install_dir(&self.install)
                .io(&self.input, &self.output)
                .functions(self.registry())
                .build()
                .unwrap()
        }

        /// Contents of every file in the output directory, sorted by name
        pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
            let mut files: Vec<_> = fs::read_dir(&self.output)
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.extension().is_some_and(|e| e != "json"))
                .map(|p| {
                    let name = p.file_name().unwrap().to_string_lossy().into_owned();
                    (name, fs::read(&p).unwrap())
                })
                .collect();
            files.sort();
            files
        }
    }
}

#[cfg(all(test, unix))]
mod e2e_tests {
    use std::fs;

    use artifact_cache::FileCache;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{CacheDecision, PipelineBlueprint, StageName};
    use stage_executor::{ExecutorError, FacePipeline, StageState};

    use crate::fixture::{write_script, Workspace};

    /// Full run, then a second run that reuses everything
    #[tokio::test]
    async fn test_second_run_performs_no_operations() {
        let ws = Workspace::new();

        let mut first = ws.pipeline(PipelineBlueprint::default());
        let report = first.run_all().await.unwrap();
        assert_eq!(report.ran(), 9);
        assert_eq!(
            ws.calls(),
            vec![
                "video_detect_face",
                "video_detect_landmarks",
                "video_learn_identity",
                "video_from_saved_identity"
            ]
        );
        assert_eq!(ws.function_calls(), 5);
        let before = ws.snapshot();
        assert_eq!(before.len(), 13);

        let mut second = ws.pipeline(PipelineBlueprint::default());
        let report = second.run_all().await.unwrap();
        assert_eq!(report.ran(), 0);
        assert_eq!(report.skipped(), 9);
        assert_eq!(ws.calls().len(), 4);
        assert_eq!(ws.function_calls(), 5);
        assert_eq!(ws.snapshot(), before);
    }

    /// Every output carries a sidecar naming its producing configuration
    #[tokio::test]
    async fn test_sidecars_record_provenance() {
        let ws = Workspace::new();
        let mut pipeline = ws.pipeline(PipelineBlueprint::default());
        pipeline.run_all().await.unwrap();

        let rects_sidecar = ws.output.join("session01_rects.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(rects_sidecar).unwrap()).unwrap();
        assert_eq!(value["backend"], "3DI");
        assert_eq!(value["morphable_model"], "BFMmm-19830");
        assert_eq!(value["camera"], "30");
        assert_eq!(value["landmark"], "global4");
        assert_eq!(value["fast"], false);
        assert!(value["cmd"].as_str().unwrap().contains("video_detect_face"));
        assert!(value["createdAt"].is_string());

        let smooth = ws.output.join("session01_pose_smooth.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(smooth).unwrap()).unwrap();
        assert_eq!(value["cmd"], "smooth_pose()");
    }

    /// Deleting an intermediate output re-runs it and its dependents only
    #[tokio::test]
    async fn test_deleted_output_reruns_dependents_only() {
        let ws = Workspace::new();
        ws.pipeline(PipelineBlueprint::default())
            .run_all()
            .await
            .unwrap();

        fs::remove_file(ws.output.join("session01_landmarks.3DI")).unwrap();

        let mut rerun = ws.pipeline(PipelineBlueprint::default());
        let report = rerun.run_all().await.unwrap();
        let calls = ws.calls();
        assert_eq!(
            &calls[4..],
            &[
                "video_detect_landmarks",
                "video_learn_identity",
                "video_from_saved_identity"
            ]
        );
        let faces = &report.stages[0];
        assert_eq!(faces.stage, StageName::DetectFaces);
        assert_eq!(faces.state(), StageState::SkippedFresh);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.ran(), 8);
    }

    /// Flipping a configuration flag invalidates every output
    #[tokio::test]
    async fn test_config_change_invalidates_outputs() {
        let ws = Workspace::new();
        ws.pipeline(PipelineBlueprint::default())
            .run_all()
            .await
            .unwrap();

        let mut fast = PipelineBlueprint::default();
        fast.backend.fast = true;
        let mut pipeline = ws.pipeline(fast);

        let statuses = pipeline.status().unwrap();
        assert!(statuses.iter().all(|s| s.decision == CacheDecision::Stale));

        let report = pipeline.run_all().await.unwrap();
        assert_eq!(report.ran(), 9);
        assert!(report.stages.iter().all(|s| s.discarded > 0));

        let landmarks = fs::read_to_string(ws.output.join("session01_landmarks.3DI")).unwrap();
        assert!(landmarks.contains("cfg2"), "got: {landmarks}");
    }

    /// A stage producing only some of its outputs fails without sidecars
    #[tokio::test]
    async fn test_partial_outputs_fail_stage() {
        let ws = Workspace::new();
        write_script(&ws.install, "video_learn_identity", r#"echo shape > "$5""#);

        let mut pipeline = ws.pipeline(PipelineBlueprint::default());
        let err = pipeline.run_all().await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::StageFailed {
                stage: StageName::FitIdentity,
                ..
            }
        ));

        let cache = FileCache::default();
        for name in ["session01_shape_coeff.3DI", "session01_texture_coeff.3DI"] {
            assert!(cache.load_sidecar(&ws.output.join(name)).unwrap().is_none());
        }
        let report = pipeline.report();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.stages.len(), 3);
        assert_eq!(ws.function_calls(), 0);
    }

    /// A failing process exit status fails the stage
    #[tokio::test]
    async fn test_nonzero_exit_fails_stage() {
        let ws = Workspace::new();
        write_script(&ws.install, "video_detect_face", r#"echo rects > "$2"; exit 1"#);

        let mut pipeline = ws.pipeline(PipelineBlueprint::default());
        let err = pipeline.detect_faces().await.unwrap_err();
        assert!(err.to_string().contains("face detection"));
        assert!(FileCache::default()
            .load_sidecar(&ws.output.join("session01_rects.3DI"))
            .unwrap()
            .is_none());
    }

    /// A hung external process is killed after the stage timeout
    #[tokio::test]
    async fn test_stage_timeout_kills_process() {
        let ws = Workspace::new();
        write_script(&ws.install, "video_detect_face", "sleep 30");

        let mut blueprint = PipelineBlueprint::default();
        blueprint.execution.stage_timeout_secs = Some(1);
        let mut pipeline = ws.pipeline(blueprint);

        let started = std::time::Instant::now();
        let err = pipeline.detect_faces().await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "got: {err}");
        assert!(started.elapsed() < std::time::Duration::from_secs(15));
    }

    /// Stage groups enforce their prerequisites
    #[tokio::test]
    async fn test_prerequisite_must_be_fresh() {
        let ws = Workspace::new();
        let mut pipeline = ws.pipeline(PipelineBlueprint::default());
        pipeline.detect_faces().await.unwrap();
        pipeline.detect_landmarks().await.unwrap();

        let fitted = pipeline.fit().await.unwrap();
        assert!(fitted.iter().all(|outcome| outcome.ran()));

        FileCache::default()
            .discard_sidecar(&ws.output.join("session01_rects.3DI"))
            .unwrap();
        let mut next = ws.pipeline(PipelineBlueprint::default());
        let err = next.detect_landmarks().await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Prerequisite {
                stage: StageName::DetectLandmarks,
                prerequisite: StageName::DetectFaces
            }
        ));
    }

    /// Undistortion feeds the preprocessed video to later stages
    #[tokio::test]
    async fn test_undistort_runs_first() {
        let ws = Workspace::new();
        let mut blueprint = PipelineBlueprint::default();
        blueprint.execution.undistort = true;
        let mut pipeline = ws.pipeline(blueprint);

        let report = pipeline.run_all().await.unwrap();
        assert_eq!(report.ran(), 10);
        assert_eq!(ws.calls()[0], "video_undistort");
        assert!(ws.output.join("session01_preprocessed.mp4").exists());
    }

    /// An in-process stage without implementation stops the run up front
    #[tokio::test]
    async fn test_unbound_function_stage_is_configuration_error() {
        let ws = Workspace::new();
        let mut pipeline = FacePipeline::builder(PipelineBlueprint::default())
            .install_dir(&ws.install)
            .io(&ws.input, &ws.output)
            .build()
            .unwrap();

        let err = pipeline.run_all().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Configuration { .. }));
        assert!(ws.calls().is_empty());
    }

    /// Helpers loaded from a config file bind in-process stages to programs
    #[tokio::test]
    async fn test_config_file_helpers_bind_stages() {
        let ws = Workspace::new();
        write_script(&ws.install, "helper_smooth_pose", r#"echo helper > "$4""#);

        let toml = format!(
            r#"
[cache]
retention = "1 year"

[helpers]
smooth_pose = ["{}", "--window", "5"]
"#,
            ws.install.join("helper_smooth_pose").display()
        );
        let blueprint = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        let mut pipeline = ws.pipeline(blueprint);
        pipeline.run_all().await.unwrap();

        assert!(ws.calls().contains(&"helper_smooth_pose".to_string()));
        assert_eq!(ws.function_calls(), 4);
        let smoothed = fs::read_to_string(ws.output.join("session01_pose_smooth.3DI")).unwrap();
        assert_eq!(smoothed.trim(), "helper");
        assert!(ws.dir.path().exists());
    }
}
