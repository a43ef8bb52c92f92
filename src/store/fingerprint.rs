//! Content fingerprints and the per-filename fingerprint store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of an attachment payload, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash a payload.
    pub fn of(payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical filename → fingerprints already stored under that name.
///
/// Keyed by the pre-version name, so `invoice.pdf` and `invoice(v.2).pdf`
/// share one entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintStore {
    entries: BTreeMap<String, BTreeSet<Fingerprint>>,
}

impl FingerprintStore {
    pub fn has(&self, filename: &str, fingerprint: &Fingerprint) -> bool {
        self.entries
            .get(filename)
            .is_some_and(|set| set.contains(fingerprint))
    }

    /// Record a fingerprint. Returns `false` if the pair was already present.
    pub fn record(&mut self, filename: &str, fingerprint: Fingerprint) -> bool {
        self.entries
            .entry(filename.to_string())
            .or_default()
            .insert(fingerprint)
    }

    /// Number of distinct fingerprints recorded for a name.
    pub fn count_for(&self, filename: &str) -> usize {
        self.entries.get(filename).map_or(0, BTreeSet::len)
    }

    /// Number of logical filenames tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
