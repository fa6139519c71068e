//! Alternate artifact names for a never-overwrite policy

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Propose a sibling name for `path` that does not reuse an existing one
///
/// Counts entries in the same directory named `<stem>*<.ext>` (stem and
/// extension never overlapping), then returns `<stem><count><.ext>`.
/// A missing directory counts as empty.
pub fn propose_alternate_name(path: &Path) -> io::Result<PathBuf> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let count = match fs::read_dir(&dir) {
        Ok(entries) => {
            let mut count = 0usize;
            for entry in entries {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if name.len() >= stem.len() + ext.len()
                    && name.starts_with(&stem)
                    && name.ends_with(&ext)
                {
                    count += 1;
                }
            }
            count
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e),
    };

    Ok(path.with_file_name(format!("{stem}{count}{ext}")))
}
