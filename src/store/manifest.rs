//! Persisted fingerprint/counter manifest.
//!
//! One pretty-printed JSON file at the destination root:
//!
//! ```text
//! {
//!   "version": 1,
//!   "counters":     { "invoice.pdf": 2 },
//!   "fingerprints": { "invoice.pdf": ["9f86d0…", "60303a…"] }
//! }
//! ```
//!
//! It is rewritten atomically after every part that changes it, so an
//! interruption loses at most the part in flight.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GrabError, Result};

use super::atomic;
use super::counter::NameCounter;
use super::fingerprint::FingerprintStore;

/// Manifest file name, placed at the destination root.
pub const MANIFEST_FILE: &str = ".attachgrab-manifest.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Durable home of the [`NameCounter`] and [`FingerprintStore`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    version: u32,
    pub counters: NameCounter,
    pub fingerprints: FingerprintStore,
    #[serde(skip)]
    path: PathBuf,
}

impl Manifest {
    /// Manifest location for a destination root.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE)
    }

    /// Load the manifest, or start an empty one if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is an error: silently starting
    /// over would store every known attachment again under new version tags.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No manifest yet, starting empty");
            return Ok(Self::empty(path));
        }

        let data = std::fs::read(path).map_err(|e| GrabError::io(path, e))?;
        let mut manifest: Manifest =
            serde_json::from_slice(&data).map_err(|e| GrabError::InvalidState {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(GrabError::InvalidState {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported manifest version {} (expected {MANIFEST_VERSION})",
                    manifest.version
                ),
            });
        }
        manifest.path = path.to_path_buf();
        info!(
            path = %path.display(),
            names = manifest.fingerprints.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    fn empty(path: &Path) -> Self {
        Self {
            version: MANIFEST_VERSION,
            counters: NameCounter::default(),
            fingerprints: FingerprintStore::default(),
            path: path.to_path_buf(),
        }
    }

    /// Write the current state to disk (atomic replace).
    pub fn flush(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| GrabError::InvalidState {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        atomic::replace(&self.path, &json).map_err(|e| GrabError::io(&self.path, e))
    }
}
