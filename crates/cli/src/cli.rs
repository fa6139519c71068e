//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Face Pipeline - cached 3DI face-analysis runner
#[derive(Parser, Debug)]
#[command(
    name = "face-pipeline",
    author,
    version,
    about = "Cached 3DI face-analysis pipeline",
    long_about = "Runs the 3DI face-analysis stages on a video.\n\n\
                  Every output file carries a JSON sidecar recording the configuration \n\
                  that produced it; stages whose outputs are still valid are skipped."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FACE_PIPELINE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FACE_PIPELINE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run pipeline stages, reusing fresh outputs
    Run(RunArgs),

    /// Show the cache status of every stage without running anything
    Status(StatusArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Options shared by commands that address one input video
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when absent
    #[arg(short, long, env = "FACE_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input video (mp4, avi, mpeg); overrides io.input
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory; overrides io.output_dir
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 3DI install directory; overrides backend.install_dir and PATH_3DI
    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Retention period such as "6 months" or "1 year 2 weeks"
    #[arg(long)]
    pub retention: Option<String>,

    /// Accept outputs without a metadata sidecar (judged by file age)
    #[arg(long)]
    pub allow_missing_sidecar: bool,

    /// Use the fast landmark configuration
    #[arg(long)]
    pub fast: bool,

    /// Undistort the input video first
    #[arg(long)]
    pub undistort: bool,
}

/// Arguments for the `run` command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Stage group to run
    #[arg(long, value_enum, default_value = "all")]
    pub stages: StageGroup,

    /// Kill external processes running longer than this many seconds
    #[arg(long, env = "FACE_PIPELINE_STAGE_TIMEOUT")]
    pub stage_timeout: Option<u64>,

    /// Validate configuration and environment, print planned commands, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "FACE_PIPELINE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `status` command
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipeline.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Stage groups runnable on their own
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StageGroup {
    #[default]
    All,
    Preprocess,
    DetectFaces,
    DetectLandmarks,
    Fit,
    Localized,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_args_parse() {
        let cli = Cli::parse_from([
            "face-pipeline",
            "run",
            "-i",
            "clip.mp4",
            "-o",
            "out",
            "--stages",
            "detect-landmarks",
            "--retention",
            "5 minutes",
            "--fast",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.stages, StageGroup::DetectLandmarks);
                assert_eq!(args.target.retention.as_deref(), Some("5 minutes"));
                assert!(args.target.fast);
                assert_eq!(args.target.input, Some(PathBuf::from("clip.mp4")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
