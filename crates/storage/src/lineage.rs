//! Per-key lineage
//!
//! A lineage tracks, for one document key, the seqs of every changeset that
//! touched it plus the materialized current document.
//!
//! Seqs are stored in descending order (newest first). History pages are
//! read from the front, and new changesets always carry a higher seq than
//! anything already recorded, so appends are O(1) `push_front`s.

use folio_core::{Document, Patch};
use std::collections::VecDeque;

/// Seqs that touched one key, plus its current state
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    /// Changeset seqs, newest first
    seqs: VecDeque<u64>,
    /// Document as of the newest seq
    current: Document,
}

impl Lineage {
    /// Create an empty lineage
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a changeset touching this key and replay its patches
    ///
    /// `seq` must be greater than every seq already recorded.
    pub fn push<'a>(&mut self, seq: u64, patches: impl Iterator<Item = &'a Patch>) {
        debug_assert!(
            self.seqs.front().map_or(true, |&newest| newest < seq),
            "lineage seqs must be strictly increasing"
        );
        self.seqs.push_front(seq);
        for patch in patches {
            patch.replay(&mut self.current);
        }
    }

    /// Newest seq that touched the key
    #[inline]
    pub fn latest(&self) -> Option<u64> {
        self.seqs.front().copied()
    }

    /// Current document
    pub fn document(&self) -> &Document {
        &self.current
    }

    /// Number of changesets that touched the key
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    /// Check if nothing has touched the key
    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// Seqs newest first, strictly below `before` (exclusive), at most `limit`
    pub fn history(&self, limit: usize, before: Option<u64>) -> Vec<u64> {
        self.seqs
            .iter()
            .copied()
            .filter(|&seq| before.map_or(true, |b| seq < b))
            .take(limit)
            .collect()
    }
}
