//! Backing persistence contract
//!
//! The versioned store needs four things from persistence: read-with-version,
//! an atomic compare-and-append on a view head, ordered history scans, and
//! cursor storage. Everything above this trait (precondition checks, id
//! derivation, pagination rules) lives in [`crate::VersionedStore`].

use folio_core::{
    BridgeCursor, Changeset, ChangesetId, DocKey, Document, FolioResult, IndexId, ViewHead, ViewId,
};
use std::sync::Arc;

/// Durable storage for views, changesets and bridge cursors
///
/// Implementations must make `compare_and_append` atomic with respect to
/// every other call on the same view: two appends with the same `expected`
/// head cannot both succeed.
pub trait StoreBackend: Send + Sync {
    /// Create a view with an empty history
    ///
    /// Returns `false` if the view already existed.
    fn create_view(&self, view: &ViewId) -> FolioResult<bool>;

    /// All views, sorted by name
    fn views(&self) -> Vec<ViewId>;

    /// Current head of `view` (`None` while the history is empty)
    fn head(&self, view: &ViewId) -> FolioResult<Option<ViewHead>>;

    /// Current document for `key` and the newest changeset that touched it
    fn document(&self, view: &ViewId, key: &DocKey) -> FolioResult<Option<(Document, ViewHead)>>;

    /// Append `changeset` if the head still equals `expected`
    ///
    /// Fails with `Conflict` if the head moved. The changeset's `parent_id`
    /// must equal `expected` and its `seq` must follow the head.
    fn compare_and_append(
        &self,
        view: &ViewId,
        expected: Option<ChangesetId>,
        changeset: Changeset,
    ) -> FolioResult<Arc<Changeset>>;

    /// Seq of a changeset in `view`
    fn seq_of(&self, view: &ViewId, id: &ChangesetId) -> FolioResult<Option<u64>>;

    /// Changeset at `seq` (1-based)
    fn changeset_at(&self, view: &ViewId, seq: u64) -> FolioResult<Option<Arc<Changeset>>>;

    /// Seqs of changesets touching `key`, newest first, strictly below
    /// `before`, at most `limit`
    fn key_history(
        &self,
        view: &ViewId,
        key: &DocKey,
        before: Option<u64>,
        limit: usize,
    ) -> FolioResult<Vec<u64>>;

    /// Changesets with seq greater than `after_seq`, in commit order
    fn changesets_after(
        &self,
        view: &ViewId,
        after_seq: u64,
        limit: usize,
    ) -> FolioResult<Vec<Arc<Changeset>>>;

    /// Keys with history in `view`, sorted
    fn keys(&self, view: &ViewId) -> FolioResult<Vec<DocKey>>;

    /// Stored cursor for `(view, index)`
    fn load_cursor(&self, view: &ViewId, index: &IndexId) -> FolioResult<Option<BridgeCursor>>;

    /// Store a cursor; rejects a seq lower than the one stored
    fn save_cursor(&self, cursor: &BridgeCursor) -> FolioResult<()>;

    /// Force buffered writes to stable storage
    fn sync(&self) -> FolioResult<()>;
}
