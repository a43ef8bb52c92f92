//! Parameters of the run in progress, kept so a resume does not re-prompt.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::SortPolicy;
use crate::error::{GrabError, Result};

use super::atomic;

/// Run-state file name inside the state directory.
pub const RUN_STATE_FILE: &str = "run_state.json";

/// What a run was started with. Never holds the secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Account the run authenticates as.
    pub username: String,
    /// Root directory attachments are filed under.
    pub destination_root: PathBuf,
    /// Classification policy of the run.
    pub policy: SortPolicy,
    /// When the run was first started.
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(username: impl Into<String>, destination_root: PathBuf, policy: SortPolicy) -> Self {
        Self {
            username: username.into(),
            destination_root,
            policy,
            started_at: Utc::now(),
        }
    }

    /// Load the recorded run state, if an interrupted run left one.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path).map_err(|e| GrabError::io(path, e))?;
        let state = serde_json::from_slice(&data).map_err(|e| GrabError::InvalidState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Some(state))
    }

    /// Persist atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self).map_err(|e| GrabError::InvalidState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        atomic::replace(path, &json).map_err(|e| GrabError::io(path, e))?;
        debug!(path = %path.display(), "Saved run state");
        Ok(())
    }

    /// Delete the run-state file; a missing file is not an error.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GrabError::io(path, e)),
        }
    }

    /// Check that `requested` continues this run.
    ///
    /// Returns the first differing parameter as a [`GrabError::ResumeMismatch`].
    pub fn check_resumable(&self, requested: &RunState) -> Result<()> {
        if self.username != requested.username {
            return Err(GrabError::ResumeMismatch {
                field: "username",
                recorded: self.username.clone(),
                requested: requested.username.clone(),
            });
        }
        if self.destination_root != requested.destination_root {
            return Err(GrabError::ResumeMismatch {
                field: "destination",
                recorded: self.destination_root.display().to_string(),
                requested: requested.destination_root.display().to_string(),
            });
        }
        if self.policy != requested.policy {
            return Err(GrabError::ResumeMismatch {
                field: "sort policy",
                recorded: self.policy.to_string(),
                requested: requested.policy.to_string(),
            });
        }
        Ok(())
    }
}
