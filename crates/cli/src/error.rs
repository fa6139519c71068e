//! Error types for CLI operations.

use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// No directory containing the 3DI executables could be found
    #[error(
        "3DI package is not found (looked for {probe} in {searched} directories); \
         set PATH_3DI, backend.install_dir or --install-dir"
    )]
    InstallDirNotFound { probe: &'static str, searched: usize },

    /// Input or output not given on the command line nor in the config
    #[error("Input video and output directory are required (--input/--output or [io])")]
    MissingIo,

    /// Ctrl-C or SIGTERM stopped the run before it finished
    #[error("Pipeline run interrupted by signal")]
    Interrupted,
}

impl CliError {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}
