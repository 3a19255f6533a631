//! In-memory backend
//!
//! # Design
//!
//! - DashMap of views: lookups for different views never contend
//! - Per-view `RwLock`: readers share, the compare-and-append takes the
//!   write lock so the head check and the publish are one step
//! - FxHashMap: fast non-crypto hash for changeset ids and document keys
//!
//! The durable [`crate::LogBackend`] wraps this type and hooks its log
//! writes into the same critical sections through the `*_with` methods.

use crate::backend::StoreBackend;
use crate::lineage::Lineage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use folio_core::{
    BridgeCursor, Changeset, ChangesetId, DocKey, Document, EntityRef, FolioError, FolioResult,
    IndexId, ViewHead, ViewId,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// State of one view
#[derive(Debug, Default)]
struct ViewState {
    /// Changesets in commit order; `chain[seq - 1]`
    chain: Vec<Arc<Changeset>>,
    /// Changeset id to seq
    by_id: FxHashMap<ChangesetId, u64>,
    /// Per-key lineage and materialized document
    lineages: FxHashMap<DocKey, Lineage>,
}

impl ViewState {
    fn head(&self) -> Option<ViewHead> {
        self.chain.last().map(|cs| cs.head())
    }

    fn at(&self, seq: u64) -> Option<&Arc<Changeset>> {
        if seq == 0 {
            return None;
        }
        self.chain.get((seq - 1) as usize)
    }

    fn install(&mut self, changeset: Arc<Changeset>) {
        let seq = changeset.seq;
        for key in changeset.touched_keys() {
            self.lineages
                .entry(key.clone())
                .or_default()
                .push(seq, changeset.patches_for(&key));
        }
        self.by_id.insert(changeset.id, seq);
        self.chain.push(changeset);
    }
}

/// Volatile [`StoreBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    views: DashMap<ViewId, Arc<RwLock<ViewState>>>,
    cursors: DashMap<(ViewId, IndexId), BridgeCursor>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn view(&self, view: &ViewId) -> FolioResult<Arc<RwLock<ViewState>>> {
        self.views
            .get(view)
            .map(|state| Arc::clone(state.value()))
            .ok_or_else(|| FolioError::view_not_found(view))
    }

    /// Create a view, calling `persist` only if it is new
    pub(crate) fn create_view_with<F>(&self, view: &ViewId, persist: F) -> FolioResult<bool>
    where
        F: FnOnce() -> FolioResult<()>,
    {
        match self.views.entry(view.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                persist()?;
                slot.insert(Arc::new(RwLock::new(ViewState::default())));
                Ok(true)
            }
        }
    }

    /// Compare-and-append, calling `persist` after the checks pass and
    /// before the changeset becomes visible
    pub(crate) fn append_with<F>(
        &self,
        view: &ViewId,
        expected: Option<ChangesetId>,
        changeset: Changeset,
        persist: F,
    ) -> FolioResult<Arc<Changeset>>
    where
        F: FnOnce(&Changeset) -> FolioResult<()>,
    {
        let state = self.view(view)?;
        let mut state = state.write();

        let head = state.head();
        let actual = head.map(|h| h.id);
        if actual != expected {
            return Err(FolioError::conflict(view.clone(), expected, actual));
        }

        let next_seq = head.map_or(1, |h| h.seq + 1);
        if changeset.parent_id != expected || changeset.seq != next_seq || &changeset.view_id != view
        {
            return Err(FolioError::fatal_store(format!(
                "changeset {} (seq {}) does not extend the head of view '{}' (next seq {})",
                changeset.id.short(),
                changeset.seq,
                view,
                next_seq
            )));
        }
        if state.by_id.contains_key(&changeset.id) {
            return Err(FolioError::fatal_store(format!(
                "changeset {} already present in view '{}'",
                changeset.id.short(),
                view
            )));
        }

        persist(&changeset)?;

        let changeset = Arc::new(changeset);
        state.install(Arc::clone(&changeset));
        Ok(changeset)
    }

    /// Store a cursor, calling `persist` after the regression check
    pub(crate) fn save_cursor_with<F>(&self, cursor: &BridgeCursor, persist: F) -> FolioResult<()>
    where
        F: FnOnce(&BridgeCursor) -> FolioResult<()>,
    {
        if !self.views.contains_key(&cursor.view) {
            return Err(FolioError::view_not_found(&cursor.view));
        }
        match self.cursors.entry((cursor.view.clone(), cursor.index.clone())) {
            Entry::Occupied(mut slot) => {
                if cursor.last_seq < slot.get().last_seq {
                    return Err(FolioError::validation(format!(
                        "{} would regress from seq {} to {}",
                        EntityRef::Cursor {
                            view: cursor.view.clone(),
                            index: cursor.index.clone()
                        },
                        slot.get().last_seq,
                        cursor.last_seq
                    )));
                }
                persist(cursor)?;
                slot.insert(cursor.clone());
            }
            Entry::Vacant(slot) => {
                persist(cursor)?;
                slot.insert(cursor.clone());
            }
        }
        Ok(())
    }
}

impl StoreBackend for MemoryBackend {
    fn create_view(&self, view: &ViewId) -> FolioResult<bool> {
        self.create_view_with(view, || Ok(()))
    }

    fn views(&self) -> Vec<ViewId> {
        let mut views: Vec<ViewId> = self.views.iter().map(|e| e.key().clone()).collect();
        views.sort();
        views
    }

    fn head(&self, view: &ViewId) -> FolioResult<Option<ViewHead>> {
        Ok(self.view(view)?.read().head())
    }

    fn document(&self, view: &ViewId, key: &DocKey) -> FolioResult<Option<(Document, ViewHead)>> {
        let state = self.view(view)?;
        let state = state.read();
        let Some(lineage) = state.lineages.get(key) else {
            return Ok(None);
        };
        let latest = lineage
            .latest()
            .and_then(|seq| state.at(seq))
            .ok_or_else(|| FolioError::fatal_store(format!("lineage of '{}' is dangling", key)))?;
        Ok(Some((lineage.document().clone(), latest.head())))
    }

    fn compare_and_append(
        &self,
        view: &ViewId,
        expected: Option<ChangesetId>,
        changeset: Changeset,
    ) -> FolioResult<Arc<Changeset>> {
        self.append_with(view, expected, changeset, |_| Ok(()))
    }

    fn seq_of(&self, view: &ViewId, id: &ChangesetId) -> FolioResult<Option<u64>> {
        Ok(self.view(view)?.read().by_id.get(id).copied())
    }

    fn changeset_at(&self, view: &ViewId, seq: u64) -> FolioResult<Option<Arc<Changeset>>> {
        Ok(self.view(view)?.read().at(seq).cloned())
    }

    fn key_history(
        &self,
        view: &ViewId,
        key: &DocKey,
        before: Option<u64>,
        limit: usize,
    ) -> FolioResult<Vec<u64>> {
        let state = self.view(view)?;
        let state = state.read();
        Ok(state
            .lineages
            .get(key)
            .map(|lineage| lineage.history(limit, before))
            .unwrap_or_default())
    }

    fn changesets_after(
        &self,
        view: &ViewId,
        after_seq: u64,
        limit: usize,
    ) -> FolioResult<Vec<Arc<Changeset>>> {
        let state = self.view(view)?;
        let state = state.read();
        let start = (after_seq as usize).min(state.chain.len());
        Ok(state.chain[start..].iter().take(limit).cloned().collect())
    }

    fn keys(&self, view: &ViewId) -> FolioResult<Vec<DocKey>> {
        let state = self.view(view)?;
        let mut keys: Vec<DocKey> = state.read().lineages.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn load_cursor(&self, view: &ViewId, index: &IndexId) -> FolioResult<Option<BridgeCursor>> {
        self.view(view)?;
        Ok(self
            .cursors
            .get(&(view.clone(), index.clone()))
            .map(|c| c.value().clone()))
    }

    fn save_cursor(&self, cursor: &BridgeCursor) -> FolioResult<()> {
        self.save_cursor_with(cursor, |_| Ok(()))
    }

    fn sync(&self) -> FolioResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Claim, ClaimPath, Patch, Timestamp};
    use std::thread;

    fn main_view() -> ViewId {
        ViewId::new("main")
    }

    fn next(parent: Option<ViewHead>, key: &str, path: &str, text: &str) -> Changeset {
        Changeset::new(
            parent.map(|h| h.id),
            main_view(),
            parent.map_or(1, |h| h.seq + 1),
            vec![Patch::Add {
                key: key.into(),
                path: path.parse::<ClaimPath>().unwrap(),
                claim: Claim::text(text),
            }],
            Timestamp::now(),
            None,
        )
        .unwrap()
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        assert!(backend.create_view(&main_view()).unwrap());
        backend
    }

    #[test]
    fn test_create_view_idempotent() {
        let backend = backend();
        assert!(!backend.create_view(&main_view()).unwrap());
        assert_eq!(backend.views(), vec![main_view()]);
        assert_eq!(backend.head(&main_view()).unwrap(), None);
    }

    #[test]
    fn test_unknown_view_not_found() {
        let backend = MemoryBackend::new();
        assert!(backend.head(&main_view()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_append_advances_head_and_lineage() {
        let backend = backend();
        let first = backend
            .compare_and_append(&main_view(), None, next(None, "q1", "title", "a"))
            .unwrap();
        let second = backend
            .compare_and_append(&main_view(), Some(first.id), next(Some(first.head()), "q2", "title", "b"))
            .unwrap();

        assert_eq!(backend.head(&main_view()).unwrap(), Some(second.head()));
        let (doc, head) = backend.document(&main_view(), &DocKey::new("q1")).unwrap().unwrap();
        assert_eq!(head, first.head());
        assert_eq!(doc.len(), 1);
        assert_eq!(backend.keys(&main_view()).unwrap().len(), 2);
        assert_eq!(backend.seq_of(&main_view(), &second.id).unwrap(), Some(2));
    }

    #[test]
    fn test_stale_expected_conflicts() {
        let backend = backend();
        let first = backend
            .compare_and_append(&main_view(), None, next(None, "q1", "title", "a"))
            .unwrap();
        let err = backend
            .compare_and_append(&main_view(), None, next(None, "q1", "year", "b"))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.head(&main_view()).unwrap(), Some(first.head()));
    }

    #[test]
    fn test_changesets_after() {
        let backend = backend();
        let mut head = None;
        for i in 0..5 {
            let cs = backend
                .compare_and_append(
                    &main_view(),
                    head.map(|h: ViewHead| h.id),
                    next(head, "q1", &format!("p{}", i), "x"),
                )
                .unwrap();
            head = Some(cs.head());
        }
        let seqs: Vec<u64> = backend
            .changesets_after(&main_view(), 2, 2)
            .unwrap()
            .iter()
            .map(|cs| cs.seq)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(backend.changesets_after(&main_view(), 9, 10).unwrap().is_empty());
    }

    #[test]
    fn test_cursor_regression_rejected() {
        let backend = backend();
        let id = ChangesetId::from_bytes([7; 32]);
        let mut cursor = BridgeCursor::at(main_view(), IndexId::new("docs"), ViewHead { id, seq: 5 });
        backend.save_cursor(&cursor).unwrap();
        cursor.last_seq = 4;
        assert!(backend.save_cursor(&cursor).unwrap_err().is_validation());
        cursor.last_seq = 6;
        backend.save_cursor(&cursor).unwrap();
        let stored = backend.load_cursor(&main_view(), &IndexId::new("docs")).unwrap().unwrap();
        assert_eq!(stored.last_seq, 6);
    }

    #[test]
    fn test_concurrent_appends_single_winner() {
        let backend = Arc::new(backend());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    backend
                        .compare_and_append(&main_view(), None, next(None, "q1", &format!("p{}", i), "x"))
                        .is_ok()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(backend.head(&main_view()).unwrap().unwrap().seq, 1);
    }
}
