//! Per-filename version counter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical filename → number of distinct files stored under that name.
///
/// Counts only ever go up, within a run and across resumed runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameCounter {
    counts: BTreeMap<String, u32>,
}

impl NameCounter {
    /// Current count for a name (0 if never seen).
    pub fn get(&self, filename: &str) -> u32 {
        self.counts.get(filename).copied().unwrap_or(0)
    }

    /// Increment and return the post-increment count.
    pub fn bump(&mut self, filename: &str) -> u32 {
        let count = self.counts.entry(filename.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }
}
