//! Search engine contract
//!
//! The bridge talks to a search engine through [`SearchIndex`]. The only
//! write is a bulk upsert with per-item results; each item is guarded by
//! the seq it carries:
//!
//! | stored seq for id | incoming seq | result |
//! |-------------------|--------------|--------|
//! | none | any | `Applied` |
//! | `s` | `> s` | `Applied` |
//! | `s` | `<= s` | `Stale` (nothing written) |
//!
//! Engines without conditional writes can honour the guard with a
//! read-modify-write under their own per-document lock.

use crate::document::IndexDocument;
use folio_core::{DocKey, FolioError, IndexId};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a search engine or by projection
#[derive(Debug, Error)]
pub enum IndexError {
    /// The whole bulk request exceeded its timeout
    #[error("bulk request timed out after {0:?}")]
    Timeout(Duration),

    /// The engine could not be reached or refused the request
    #[error("index unavailable: {0}")]
    Unavailable(String),

    /// A document could not be turned into an index document
    #[error("cannot project '{key}': {reason}")]
    Transform {
        /// Source document
        key: DocKey,
        /// What went wrong
        reason: String,
    },
}

impl From<IndexError> for FolioError {
    fn from(e: IndexError) -> Self {
        FolioError::transient_index(e.to_string())
    }
}

/// One bulk upsert call
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// Documents to upsert, each guarded by its own seq
    pub actions: Vec<IndexDocument>,
    /// Deadline for the whole request
    pub timeout: Duration,
}

/// Outcome of one bulk item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// Written
    Applied,
    /// Skipped: the index already holds this seq or a newer one
    Stale {
        /// Seq currently stored for the id
        current: u64,
    },
    /// Rejected by the engine
    Failed {
        /// Engine-supplied reason
        reason: String,
    },
}

/// Per-item result, in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    /// Document id
    pub id: String,
    /// Seq carried by the request
    pub seq: u64,
    /// What happened
    pub status: ItemStatus,
}

/// Result of a bulk upsert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// One entry per request action, same order
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    /// Items written
    pub fn applied(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Applied))
    }

    /// Items skipped by the seq guard
    pub fn stale(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Stale { .. }))
    }

    /// Items the engine rejected
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.status)).count()
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id
    pub id: String,
    /// Seq of the indexed projection
    pub seq: u64,
    /// Relevance, higher is better
    pub score: f32,
}

/// Search engine used by the bridge
///
/// Implementations must be safe to call from several worker threads at
/// once. Indexes are created implicitly by the first upsert.
pub trait SearchIndex: Send + Sync {
    /// Guarded upsert of every action in `request`
    ///
    /// `Err` means the request as a whole failed and nothing can be assumed
    /// about individual items. Implementations must give up once
    /// `request.timeout` has passed and report [`IndexError::Timeout`];
    /// the bridge does not time calls itself.
    fn bulk_upsert(&self, index: &IndexId, request: BulkRequest)
        -> Result<BulkResponse, IndexError>;

    /// Stored projection for `id`
    fn get(&self, index: &IndexId, id: &str) -> Result<Option<IndexDocument>, IndexError>;

    /// Documents matching any term of `query`, best first
    fn search(&self, index: &IndexId, query: &str, limit: usize)
        -> Result<Vec<SearchHit>, IndexError>;

    /// Number of documents in `index`
    fn count(&self, index: &IndexId) -> Result<usize, IndexError>;
}
