//! Persistent state: fingerprints, name counters, the progress journal and
//! the run-state file.

pub mod atomic;
pub mod counter;
pub mod fingerprint;
pub mod journal;
pub mod manifest;
pub mod run_state;

use std::path::{Path, PathBuf};

use journal::JOURNAL_FILE;
use run_state::RUN_STATE_FILE;

/// Locations of the resume files inside a state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub journal: PathBuf,
    pub run_state: PathBuf,
}

impl StatePaths {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            journal: dir.join(JOURNAL_FILE),
            run_state: dir.join(RUN_STATE_FILE),
            dir,
        }
    }

    /// Whether an interrupted run left resume files behind.
    pub fn has_resume_state(&self) -> bool {
        self.run_state.exists() || self.journal.exists()
    }
}
