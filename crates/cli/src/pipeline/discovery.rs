//! 3DI install directory discovery.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use stage_executor::PROBE_EXECUTABLE;
use tracing::{debug, warn};

use crate::error::CliError;

/// Resolve the install directory
///
/// Order: explicit value (command line or config), then the `PATH_3DI`
/// directory, then every `PATH` entry containing the identity-fitting
/// executable.
pub fn discover_install_dir(
    explicit: Option<&Path>,
    path_3di: Option<&OsStr>,
    path: Option<&OsStr>,
) -> Result<PathBuf, CliError> {
    if let Some(dir) = explicit {
        debug!(install_dir = %dir.display(), "Using configured 3DI install directory");
        return Ok(dir.to_path_buf());
    }

    let candidates: Vec<PathBuf> = match path_3di {
        Some(dir) if !dir.is_empty() => vec![PathBuf::from(dir)],
        _ => {
            warn!("PATH_3DI environment variable is not set, searching PATH");
            path.map(|p| std::env::split_paths(p).collect())
                .unwrap_or_default()
        }
    };

    candidates
        .iter()
        .find(|dir| dir.join(PROBE_EXECUTABLE).exists())
        .cloned()
        .ok_or(CliError::InstallDirNotFound {
            probe: PROBE_EXECUTABLE,
            searched: candidates.len(),
        })
}
