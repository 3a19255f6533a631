//! Versioned document store
//!
//! `VersionedStore` layers the changeset protocol over a [`StoreBackend`]:
//!
//! ```text
//! 1. Validate op shapes (no store access)
//! 2. Take the view's commit lock
//! 3. Compare the caller's base with the head; mismatch -> Conflict
//! 4. Stage ops against current documents; unmet precondition -> Validation
//! 5. Derive the changeset (parent = base, seq = head.seq + 1, id = hash)
//! 6. Backend compare-and-append (durability point)
//! ```
//!
//! The commit lock is per view: proposals on different views never wait on
//! each other. The backend repeats the head comparison inside its own
//! critical section, so a backend shared by several stores still cannot
//! lose an update.

use crate::apply;
use crate::backend::StoreBackend;
use crate::memory::MemoryBackend;
use dashmap::DashMap;
use folio_core::{
    BridgeCursor, Changeset, ChangesetId, DocKey, Document, FolioError, FolioResult, IndexId,
    Limits, PatchOp, SessionId, Timestamp, ViewHead, ViewId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page of a key's history, newest first
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Changesets touching the key, in strictly decreasing seq order
    pub changesets: Vec<Arc<Changeset>>,
    /// Cursor for the next page (`None` when this is the last page)
    pub next: Option<ChangesetId>,
}

/// Commit counters
///
/// Relaxed atomics; the values are observational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Changesets committed
    pub commits: u64,
    /// Proposals rejected because the head moved
    pub conflicts: u64,
    /// Proposals rejected by validation
    pub rejected: u64,
}

/// Branchable, versioned document store
pub struct VersionedStore {
    backend: Arc<dyn StoreBackend>,
    limits: Limits,
    commit_locks: DashMap<ViewId, Arc<Mutex<()>>>,
    commits: AtomicU64,
    conflicts: AtomicU64,
    rejected: AtomicU64,
}

impl VersionedStore {
    /// Store over `backend` with default limits
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_limits(backend, Limits::default())
    }

    /// Store over `backend` with explicit limits
    pub fn with_limits(backend: Arc<dyn StoreBackend>, limits: Limits) -> Self {
        VersionedStore {
            backend,
            limits,
            commit_locks: DashMap::new(),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Volatile store, for tests and ephemeral databases
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Structural limits applied to proposals
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Provision a view (idempotent); returns `true` if it was created
    pub fn create_view(&self, view: &ViewId) -> FolioResult<bool> {
        if view.as_str().is_empty() {
            return Err(FolioError::validation("view name must not be empty"));
        }
        let created = self.backend.create_view(view)?;
        if created {
            info!(target: "folio::store", view = %view, "View created");
        }
        Ok(created)
    }

    /// All provisioned views
    pub fn views(&self) -> Vec<ViewId> {
        self.backend.views()
    }

    /// Current head of `view`
    pub fn head(&self, view: &ViewId) -> FolioResult<Option<ViewHead>> {
        self.backend.head(view)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current document and the changeset that last touched it
    pub fn get_latest(&self, view: &ViewId, key: &DocKey) -> FolioResult<(Document, ChangesetId)> {
        self.backend
            .document(view, key)?
            .map(|(doc, head)| (doc, head.id))
            .ok_or_else(|| FolioError::document_not_found(view, key))
    }

    /// Document as of changeset `at` (inclusive)
    ///
    /// Replays the key's patches from its first changeset up to `at`.
    pub fn get_at_version(
        &self,
        view: &ViewId,
        key: &DocKey,
        at: &ChangesetId,
    ) -> FolioResult<Document> {
        let bound = self.resolve(view, at)?;
        let seqs = self
            .backend
            .key_history(view, key, Some(bound + 1), usize::MAX)?;
        if seqs.is_empty() {
            return Err(FolioError::document_not_found(view, key));
        }

        let mut doc = Document::new();
        for seq in seqs.into_iter().rev() {
            let changeset = self.changeset_at(view, seq)?;
            for patch in changeset.patches_for(key) {
                patch.replay(&mut doc);
            }
        }
        Ok(doc)
    }

    /// Changeset by id
    pub fn changeset(&self, view: &ViewId, id: &ChangesetId) -> FolioResult<Arc<Changeset>> {
        let seq = self.resolve(view, id)?;
        self.changeset_at(view, seq)
    }

    /// Page of changesets touching `key`, newest first
    ///
    /// `cursor` is the `next` value of the previous page (exclusive). Pages
    /// are keyed by seq, so appends between calls never shift them.
    pub fn history(
        &self,
        view: &ViewId,
        key: &DocKey,
        limit: usize,
        cursor: Option<&ChangesetId>,
    ) -> FolioResult<HistoryPage> {
        if limit == 0 {
            return Err(FolioError::validation("history limit must be at least 1"));
        }
        let before = match cursor {
            Some(id) => Some(self.resolve(view, id)?),
            None => None,
        };
        if before.is_none() && self.backend.document(view, key)?.is_none() {
            return Err(FolioError::document_not_found(view, key));
        }

        let mut seqs = self
            .backend
            .key_history(view, key, before, limit.saturating_add(1))?;
        let has_more = seqs.len() > limit;
        seqs.truncate(limit);

        let changesets = seqs
            .into_iter()
            .map(|seq| self.changeset_at(view, seq))
            .collect::<FolioResult<Vec<_>>>()?;
        let next = if has_more {
            changesets.last().map(|cs| cs.id)
        } else {
            None
        };
        Ok(HistoryPage { changesets, next })
    }

    /// Changesets after `after` (exclusive) in commit order, at most `limit`
    ///
    /// `after = None` starts from the first changeset of the view.
    pub fn changesets_after(
        &self,
        view: &ViewId,
        after: Option<&ChangesetId>,
        limit: usize,
    ) -> FolioResult<Vec<Arc<Changeset>>> {
        if limit == 0 {
            return Err(FolioError::validation("scan limit must be at least 1"));
        }
        let after_seq = match after {
            Some(id) => self.resolve(view, id)?,
            None => 0,
        };
        self.backend.changesets_after(view, after_seq, limit)
    }

    /// Keys with history in `view`
    pub fn keys(&self, view: &ViewId) -> FolioResult<Vec<DocKey>> {
        self.backend.keys(view)
    }

    /// Every document in `view` with the changeset that last touched it
    pub fn documents(&self, view: &ViewId) -> FolioResult<Vec<(DocKey, Document, ViewHead)>> {
        let mut out = Vec::new();
        for key in self.backend.keys(view)? {
            if let Some((doc, head)) = self.backend.document(view, &key)? {
                out.push((key, doc, head));
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Apply `ops` as one changeset on top of `base`
    ///
    /// Fails with `Conflict` if `base` is not the current head, and with
    /// `Validation` if the ops are malformed or any precondition fails. On
    /// any failure the head is untouched.
    pub fn propose(
        &self,
        view: &ViewId,
        base: Option<ChangesetId>,
        ops: Vec<PatchOp>,
        author: Option<SessionId>,
    ) -> FolioResult<Arc<Changeset>> {
        if let Err(e) = self.validate_ops(&ops) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let lock = self.commit_lock(view);
        let _guard = lock.lock();

        let head = self.backend.head(view)?;
        let actual = head.map(|h| h.id);
        if actual != base {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "folio::store",
                view = %view,
                base = ?base,
                head = ?actual,
                "Proposal conflicts with view head"
            );
            return Err(FolioError::conflict(view.clone(), base, actual));
        }

        let patches = apply::stage(ops, |key| {
            Ok(self.backend.document(view, key)?.map(|(doc, _)| doc))
        })
        .map_err(|e| {
            if e.is_validation() {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(target: "folio::store", view = %view, error = %e, "Proposal rejected");
            }
            e
        })?;

        let seq = head.map_or(1, |h| h.seq + 1);
        let changeset = Changeset::new(base, view.clone(), seq, patches, Timestamp::now(), author)?;
        let committed = self
            .backend
            .compare_and_append(view, base, changeset)
            .map_err(|e| {
                if e.is_conflict() {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                e
            })?;

        self.commits.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "folio::store",
            view = %view,
            seq = committed.seq,
            id = %committed.id.short(),
            patches = committed.patches.len(),
            "Changeset committed"
        );
        Ok(committed)
    }

    // ========================================================================
    // Bridge cursors
    // ========================================================================

    /// Stored cursor for `(view, index)`, if one has been saved
    pub fn load_cursor(&self, view: &ViewId, index: &IndexId) -> FolioResult<Option<BridgeCursor>> {
        self.backend.load_cursor(view, index)
    }

    /// Persist a cursor; a seq lower than the stored one is rejected
    pub fn save_cursor(&self, cursor: &BridgeCursor) -> FolioResult<()> {
        self.backend.save_cursor(cursor)
    }

    /// Force buffered writes to stable storage
    pub fn sync(&self) -> FolioResult<()> {
        self.backend.sync()
    }

    /// Commit counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn validate_ops(&self, ops: &[PatchOp]) -> FolioResult<()> {
        if ops.is_empty() {
            return Err(FolioError::validation("changeset must contain at least one patch"));
        }
        if ops.len() > self.limits.max_patches_per_changeset {
            return Err(FolioError::validation(format!(
                "changeset has {} patches, limit is {}",
                ops.len(),
                self.limits.max_patches_per_changeset
            )));
        }
        ops.iter().try_for_each(|op| op.validate(&self.limits))
    }

    fn commit_lock(&self, view: &ViewId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.commit_locks
                .entry(view.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn resolve(&self, view: &ViewId, id: &ChangesetId) -> FolioResult<u64> {
        self.backend
            .seq_of(view, id)?
            .ok_or_else(|| FolioError::changeset_not_found(view, id))
    }

    fn changeset_at(&self, view: &ViewId, seq: u64) -> FolioResult<Arc<Changeset>> {
        self.backend.changeset_at(view, seq)?.ok_or_else(|| {
            FolioError::fatal_store(format!("view '{}' has no changeset at seq {}", view, seq))
        })
    }
}
