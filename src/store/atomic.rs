//! All-or-nothing file writes.
//!
//! Bytes go to a temporary file in the target directory, are synced, and the
//! temporary file is then renamed over (or next to) the target. A crash never
//! leaves a half-written file under the final name.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

fn staged(path: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Write `bytes` to `path`, replacing any existing file.
pub fn replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    staged(path, bytes)?.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `bytes` to `path`, failing with `AlreadyExists` if it is taken.
pub fn create_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    staged(path, bytes)?
        .persist_noclobber(path)
        .map_err(|e| e.error)?;
    Ok(())
}
