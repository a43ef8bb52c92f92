//! Name allocation: decide whether a part is new, a duplicate, or a
//! same-name collision that needs a version tag.

use crate::store::fingerprint::Fingerprint;
use crate::store::manifest::Manifest;

use super::sanitize::versioned_name;

/// Outcome of allocating a name for one part.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocation {
    /// Zero-length payload: never hashed, never counted.
    Empty,
    /// Same bytes already stored under this logical name.
    Duplicate { fingerprint: Fingerprint },
    /// New content. `version` is the post-increment count for the name.
    Fresh {
        final_name: String,
        version: u32,
        fingerprint: Fingerprint,
    },
}

/// Decides final on-disk names against the persisted manifest.
#[derive(Debug, Clone, Copy)]
pub struct NameAllocator {
    max_len: usize,
}

impl NameAllocator {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Allocate a name for `payload` stored under `logical`.
    ///
    /// The duplicate check runs before the counter moves, so duplicates never
    /// consume a version slot. For fresh content the counter is bumped here,
    /// but the fingerprint is only recorded by [`NameAllocator::commit`] once
    /// the bytes are on disk.
    pub fn allocate(&self, manifest: &mut Manifest, logical: &str, payload: &[u8]) -> Allocation {
        if payload.is_empty() {
            return Allocation::Empty;
        }

        let fingerprint = Fingerprint::of(payload);
        if manifest.fingerprints.has(logical, &fingerprint) {
            return Allocation::Duplicate { fingerprint };
        }

        let version = manifest.counters.bump(logical);
        let final_name = if version == 1 {
            logical.to_string()
        } else {
            versioned_name(logical, version, self.max_len)
        };

        Allocation::Fresh {
            final_name,
            version,
            fingerprint,
        }
    }

    /// Record stored content against its logical (pre-version) name.
    pub fn commit(&self, manifest: &mut Manifest, logical: &str, fingerprint: Fingerprint) {
        manifest.fingerprints.record(logical, fingerprint);
    }
}
