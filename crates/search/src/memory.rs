//! In-process search engine
//!
//! `MemoryIndex` implements [`SearchIndex`] with one `RwLock`-guarded state
//! per index name. Each state keeps the stored projections plus an inverted
//! index from term to `(doc id, term frequency)`.
//!
//! The seq guard is evaluated under the index's write lock, so concurrent
//! bulk calls from several bridge workers converge on the highest seq per
//! document regardless of arrival order. A bulk call that cannot take the
//! write lock within its request timeout fails with `Timeout`.

use crate::document::IndexDocument;
use crate::index::{BulkItem, BulkRequest, BulkResponse, IndexError, ItemStatus, SearchHit, SearchIndex};
use crate::tokenizer::{tokenize, tokenize_unique};
use dashmap::DashMap;
use folio_core::IndexId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// IndexState
// ============================================================================

#[derive(Default)]
struct IndexState {
    docs: FxHashMap<String, IndexDocument>,
    /// term -> doc id -> term frequency
    postings: FxHashMap<String, FxHashMap<String, u32>>,
}

impl IndexState {
    fn upsert(&mut self, doc: IndexDocument) -> ItemStatus {
        if let Some(current) = self.docs.get(&doc.id) {
            if current.seq >= doc.seq {
                return ItemStatus::Stale {
                    current: current.seq,
                };
            }
        }
        self.unindex(&doc.id);

        let mut tf: FxHashMap<String, u32> = FxHashMap::default();
        for term in tokenize(&doc.text) {
            *tf.entry(term).or_insert(0) += 1;
        }
        for (term, freq) in tf {
            self.postings
                .entry(term)
                .or_default()
                .insert(doc.id.clone(), freq);
        }
        self.docs.insert(doc.id.clone(), doc);
        ItemStatus::Applied
    }

    fn unindex(&mut self, id: &str) {
        let Some(old) = self.docs.get(id) else {
            return;
        };
        for term in tokenize_unique(&old.text) {
            if let Some(list) = self.postings.get_mut(&term) {
                list.remove(id);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let total = self.docs.len() as f32;
        let mut scores: FxHashMap<&str, f32> = FxHashMap::default();
        for term in tokenize_unique(query) {
            let Some(list) = self.postings.get(&term) else {
                continue;
            };
            let idf = (1.0 + total / list.len() as f32).ln();
            for (id, freq) in list {
                *scores.entry(id.as_str()).or_insert(0.0) += *freq as f32 * idf;
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                self.docs.get(id).map(|doc| SearchHit {
                    id: id.to_string(),
                    seq: doc.seq,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }
}

// ============================================================================
// MemoryIndex
// ============================================================================

/// Counters for a [`MemoryIndex`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryIndexStats {
    /// Bulk calls received
    pub bulk_calls: u64,
    /// Actions received across all bulk calls
    pub actions: u64,
    /// Actions written
    pub applied: u64,
    /// Actions skipped by the seq guard
    pub stale: u64,
}

/// Search engine held entirely in memory
#[derive(Default)]
pub struct MemoryIndex {
    indexes: DashMap<IndexId, Arc<RwLock<IndexState>>>,
    bulk_calls: AtomicU64,
    actions: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
}

impl MemoryIndex {
    /// Empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored document of `index`, keyed by id
    pub fn documents(&self, index: &IndexId) -> BTreeMap<String, IndexDocument> {
        match self.state(index) {
            Some(state) => state
                .read()
                .docs
                .iter()
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect(),
            None => BTreeMap::new(),
        }
    }

    /// Counters since creation
    pub fn stats(&self) -> MemoryIndexStats {
        MemoryIndexStats {
            bulk_calls: self.bulk_calls.load(Ordering::Relaxed),
            actions: self.actions.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }

    fn state(&self, index: &IndexId) -> Option<Arc<RwLock<IndexState>>> {
        self.indexes.get(index).map(|s| Arc::clone(s.value()))
    }
}

impl SearchIndex for MemoryIndex {
    fn bulk_upsert(
        &self,
        index: &IndexId,
        request: BulkRequest,
    ) -> Result<BulkResponse, IndexError> {
        self.bulk_calls.fetch_add(1, Ordering::Relaxed);
        self.actions
            .fetch_add(request.actions.len() as u64, Ordering::Relaxed);

        let state = Arc::clone(self.indexes.entry(index.clone()).or_default().value());
        let Some(mut state) = state.try_write_for(request.timeout) else {
            return Err(IndexError::Timeout(request.timeout));
        };
        let mut items = Vec::with_capacity(request.actions.len());
        for doc in request.actions {
            let id = doc.id.clone();
            let seq = doc.seq;
            let status = state.upsert(doc);
            match status {
                ItemStatus::Applied => self.applied.fetch_add(1, Ordering::Relaxed),
                _ => self.stale.fetch_add(1, Ordering::Relaxed),
            };
            items.push(BulkItem { id, seq, status });
        }
        Ok(BulkResponse { items })
    }

    fn get(&self, index: &IndexId, id: &str) -> Result<Option<IndexDocument>, IndexError> {
        Ok(self
            .state(index)
            .and_then(|state| state.read().docs.get(id).cloned()))
    }

    fn search(
        &self,
        index: &IndexId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        Ok(self
            .state(index)
            .map(|state| state.read().search(query, limit))
            .unwrap_or_default())
    }

    fn count(&self, index: &IndexId) -> Result<usize, IndexError> {
        Ok(self.state(index).map_or(0, |state| state.read().docs.len()))
    }
}
