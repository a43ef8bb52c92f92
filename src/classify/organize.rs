//! Re-file an existing flat directory of downloads by file metadata.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{GrabError, Result};

use super::{ClassifyInput, SortPolicy};

/// Statistics returned by an organize pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OrganizeStats {
    pub moved: usize,
    pub skipped: usize,
}

/// Move every regular, non-hidden file at the top level of `dir` into the
/// subdirectory `policy` picks for it.
///
/// Existing targets are never overwritten; such files stay where they are.
/// Only file-based policies are accepted.
pub fn organize_directory(dir: &Path, policy: SortPolicy) -> Result<OrganizeStats> {
    if !policy.is_file_based() {
        return Err(GrabError::PolicyNeedsMessage(policy.to_string()));
    }
    if !dir.is_dir() {
        return Err(GrabError::InvalidPath(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let mut stats = OrganizeStats::default();
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| GrabError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let input = ClassifyInput {
            message: None,
            file_name: &name,
            size: meta.len(),
        };
        let target_dir = policy.resolve(dir, &input).map_err(|e| GrabError::io(dir, e))?;
        if target_dir == dir {
            continue;
        }

        let target = target_dir.join(&name);
        if target.exists() {
            warn!(file = %name, target = %target.display(), "Target exists, leaving file in place");
            stats.skipped += 1;
            continue;
        }
        std::fs::rename(&path, &target).map_err(|e| GrabError::io(&path, e))?;
        stats.moved += 1;
    }

    info!(
        dir = %dir.display(),
        policy = %policy,
        moved = stats.moved,
        skipped = stats.skipped,
        "Organized directory"
    );
    Ok(stats)
}
