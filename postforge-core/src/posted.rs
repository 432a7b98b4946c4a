//! Duplicate-post suppression.

use std::collections::{HashSet, VecDeque};

use md5::{Digest, Md5};

/// Most fingerprints kept before trimming.
pub const POSTED_CAPACITY: usize = 50;

/// Fingerprints kept after a trim.
pub const POSTED_RETAIN: usize = 25;

/// Lowercase hex MD5 of `title`.
pub fn fingerprint(title: &str) -> String {
    hex::encode(Md5::digest(title.as_bytes()))
}

/// Bounded, insertion-ordered set of posted fingerprints.
#[derive(Debug, Clone, Default)]
pub struct PostedSet {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl PostedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.members.contains(fingerprint)
    }

    /// Record a fingerprint. Returns false if it was already present.
    ///
    /// When the set would exceed [`POSTED_CAPACITY`] only the
    /// [`POSTED_RETAIN`] most recent entries are kept.
    pub fn insert(&mut self, fingerprint: impl Into<String>) -> bool {
        let fingerprint = fingerprint.into();
        if self.members.contains(&fingerprint) {
            return false;
        }

        if self.order.len() + 1 > POSTED_CAPACITY {
            let drop = self.order.len() + 1 - POSTED_RETAIN;
            for old in self.order.drain(..drop) {
                self.members.remove(&old);
            }
            tracing::debug!(kept = self.order.len() + 1, "trimmed posted fingerprints");
        }

        self.members.insert(fingerprint.clone());
        self.order.push_back(fingerprint);
        true
    }

    /// Fingerprint `title` and record it.
    pub fn record_title(&mut self, title: &str) -> bool {
        self.insert(fingerprint(title))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
