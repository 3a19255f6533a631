//! Session coordinator
//!
//! Owns every edit session and mediates between clients and the
//! [`VersionedStore`]. The coordinator is an explicit service object: it is
//! constructed at startup, shared by `Arc`, and dropped at shutdown.
//!
//! Sessions never lock the store. Any number may be open on the same key;
//! the first `end_edit` wins the view head and the others come back with
//! `Conflict`, after which the caller opens a fresh session on the new
//! head and resubmits. There is no automatic rebase or merge.
//!
//! Terminal sessions stay readable for audit until they are older than the
//! retention window; `begin_edit` sweeps them at most once per window.
//! After [`SessionCoordinator::close`] nothing new can be opened, saved or
//! committed, but every session can still be read or discarded.
//!
//! # Memory Ordering
//!
//! The counters use Relaxed ordering. They are observational only and do
//! not synchronize any other memory.

use crate::session::{ChangePage, EditSession, Operation, SessionInfo, SessionStatus};
use crate::validation::validate_operation;
use dashmap::DashMap;
use folio_core::limits::MAX_LIST_PAGE;
use folio_core::{Changeset, DocKey, FolioError, FolioResult, PatchOp, SessionId, Timestamp, ViewId};
use folio_storage::VersionedStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Sessions opened
    pub begun: u64,
    /// Sessions committed
    pub committed: u64,
    /// Commits that lost to a concurrent writer
    pub conflicted: u64,
    /// Sessions discarded by the client
    pub discarded: u64,
    /// Commits that failed validation
    pub rejected: u64,
}

impl CoordinatorStats {
    /// Sessions that reached a terminal state
    pub fn closed(&self) -> u64 {
        self.committed + self.conflicted + self.discarded + self.rejected
    }
}

/// Manages edit sessions over a versioned store
pub struct SessionCoordinator {
    store: Arc<VersionedStore>,
    sessions: DashMap<SessionId, Arc<Mutex<EditSession>>>,
    /// Age at which terminal sessions are swept; `None` disables sweeping
    retention: Option<Duration>,
    last_sweep: Mutex<Instant>,
    closed: AtomicBool,
    begun: AtomicU64,
    committed: AtomicU64,
    conflicted: AtomicU64,
    discarded: AtomicU64,
    rejected: AtomicU64,
}

impl SessionCoordinator {
    /// Coordinator over `store` that keeps terminal sessions until
    /// [`purge_closed`](Self::purge_closed) is called
    pub fn new(store: Arc<VersionedStore>) -> Self {
        Self::build(store, None)
    }

    /// Coordinator that sweeps terminal sessions older than `retention`
    pub fn with_retention(store: Arc<VersionedStore>, retention: Duration) -> Self {
        Self::build(store, Some(retention))
    }

    fn build(store: Arc<VersionedStore>, retention: Option<Duration>) -> Self {
        SessionCoordinator {
            store,
            sessions: DashMap::new(),
            retention,
            last_sweep: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            conflicted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Store sessions commit to
    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Refuse new sessions and commits from now on
    ///
    /// Open sessions stay open and readable; they can only be discarded.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                target: "folio::session",
                open = self.open_sessions().len(),
                "Coordinator closed"
            );
        }
    }

    /// True once [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open a session on `key`, based on the current head of `view`
    pub fn begin_edit(&self, view: &ViewId, key: &DocKey) -> FolioResult<SessionId> {
        self.ensure_accepting()?;
        self.sweep_if_due();
        self.store.limits().validate_key(key)?;
        let base = self.store.head(view)?.map(|h| h.id);

        let session = EditSession::new(view.clone(), key.clone(), base);
        let id = session.id();
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        self.begun.fetch_add(1, Ordering::Relaxed);

        debug!(
            target: "folio::session",
            session = %id,
            view = %view,
            key = %key,
            base = ?base,
            "Session opened"
        );
        Ok(id)
    }

    /// Append an operation to an open session, returning its seq
    ///
    /// Only the operation's shape is checked; conflicts are detected at
    /// `end_edit`.
    pub fn save_change(&self, session: SessionId, patches: Vec<PatchOp>) -> FolioResult<u64> {
        self.ensure_accepting()?;
        let handle = self.handle(session)?;
        let mut s = handle.lock();
        s.ensure_open()?;
        validate_operation(s.key(), &patches, self.store.limits())?;
        let seq = s.append(patches)?;
        debug!(target: "folio::session", session = %session, seq, "Change saved");
        Ok(seq)
    }

    /// One page of a session's log, for audit and replay
    ///
    /// Works on sessions in any state. `page_size` must be in `1..=5000`.
    pub fn list_changes(
        &self,
        session: SessionId,
        after_seq: u64,
        page_size: usize,
    ) -> FolioResult<ChangePage> {
        check_page_size(page_size)?;
        let handle = self.handle(session)?;
        let page = handle.lock().page(after_seq, page_size);
        Ok(page)
    }

    /// Iterator over a session's log, fetched `page_size` at a time
    ///
    /// The iterator stops at the last operation present when it was
    /// created. Use [`ChangeIter::resume_after`] to restart from any seq.
    pub fn changes(&self, session: SessionId, page_size: usize) -> FolioResult<ChangeIter<'_>> {
        check_page_size(page_size)?;
        let upto = self.handle(session)?.lock().len() as u64;
        Ok(ChangeIter {
            coordinator: self,
            session,
            page_size,
            after: 0,
            upto,
            buffer: Vec::new(),
        })
    }

    /// Commit the session's log as one changeset
    ///
    /// | Store result | Session becomes | Returned |
    /// |--------------|-----------------|----------|
    /// | success | `Committed` | the changeset |
    /// | `Conflict` | `Conflicted` | the conflict |
    /// | `Validation` | `Rejected` | the validation error |
    /// | anything else | stays `Open` | the error |
    ///
    /// An empty log is a `Validation` error and leaves the session open.
    pub fn end_edit(&self, session: SessionId) -> FolioResult<Arc<Changeset>> {
        self.ensure_accepting()?;
        let handle = self.handle(session)?;
        let mut s = handle.lock();
        s.ensure_open()?;
        if s.is_empty() {
            return Err(FolioError::validation(format!(
                "session {} has no changes to commit",
                session
            )));
        }

        let ops = s.reduce();
        match self.store.propose(s.view(), s.base(), ops, Some(session)) {
            Ok(changeset) => {
                s.mark_committed(changeset.id)?;
                self.committed.fetch_add(1, Ordering::Relaxed);
                info!(
                    target: "folio::session",
                    session = %session,
                    view = %s.view(),
                    key = %s.key(),
                    seq = changeset.seq,
                    "Session committed"
                );
                Ok(changeset)
            }
            Err(e) if e.is_conflict() => {
                s.mark_conflicted(e.to_string())?;
                self.conflicted.fetch_add(1, Ordering::Relaxed);
                warn!(target: "folio::session", session = %session, error = %e, "Session conflicted");
                Err(e)
            }
            Err(e) if e.is_validation() => {
                s.mark_rejected(e.to_string())?;
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(target: "folio::session", session = %session, error = %e, "Session rejected");
                Err(e)
            }
            Err(e) => {
                error!(
                    target: "folio::session",
                    session = %session,
                    error = %e,
                    "Commit failed; session left open"
                );
                Err(e)
            }
        }
    }

    /// Abandon an open session; the store is not touched
    pub fn discard_edit(&self, session: SessionId) -> FolioResult<()> {
        let handle = self.handle(session)?;
        let mut s = handle.lock();
        s.mark_discarded()?;
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "folio::session",
            session = %session,
            operations = s.len(),
            "Session discarded"
        );
        Ok(())
    }

    /// Snapshot of one session
    pub fn session(&self, session: SessionId) -> FolioResult<SessionInfo> {
        Ok(self.handle(session)?.lock().info())
    }

    /// Snapshots of all open sessions
    pub fn open_sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<Arc<Mutex<EditSession>>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut open: Vec<SessionInfo> = handles
            .iter()
            .map(|h| h.lock().info())
            .filter(|info| info.status == SessionStatus::Open)
            .collect();
        open.sort_by_key(|info| info.opened_at);
        open
    }

    /// Drop terminal sessions closed at least `retention` ago
    ///
    /// Returns the number of sessions removed. Open sessions are never
    /// removed.
    pub fn purge_closed(&self, retention: Duration) -> usize {
        let cutoff = Timestamp::now().saturating_sub(retention);
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| {
            let s = handle.lock();
            !matches!(s.closed_at(), Some(closed) if closed <= cutoff)
        });
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!(target: "folio::session", purged, "Closed sessions purged");
        }
        purged
    }

    /// Session counters
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            conflicted: self.conflicted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn ensure_accepting(&self) -> FolioResult<()> {
        if self.is_closed() {
            return Err(FolioError::validation("session coordinator is closed"));
        }
        Ok(())
    }

    /// Purge with the configured retention if a window has passed since the
    /// last sweep
    fn sweep_if_due(&self) {
        let Some(retention) = self.retention else {
            return;
        };
        {
            let mut last = self.last_sweep.lock();
            if last.elapsed() < retention {
                return;
            }
            *last = Instant::now();
        }
        self.purge_closed(retention);
    }

    fn handle(&self, session: SessionId) -> FolioResult<Arc<Mutex<EditSession>>> {
        self.sessions
            .get(&session)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| FolioError::session_not_found(session))
    }
}

fn check_page_size(page_size: usize) -> FolioResult<()> {
    if page_size == 0 || page_size > MAX_LIST_PAGE {
        return Err(FolioError::validation(format!(
            "page size {} outside 1..={}",
            page_size, MAX_LIST_PAGE
        )));
    }
    Ok(())
}

/// Paged iterator over a session log
///
/// Created by [`SessionCoordinator::changes`]. Ends early if the session is
/// purged while iterating.
pub struct ChangeIter<'a> {
    coordinator: &'a SessionCoordinator,
    session: SessionId,
    page_size: usize,
    after: u64,
    upto: u64,
    /// Current page, reversed so `pop` yields seq order
    buffer: Vec<Operation>,
}

impl ChangeIter<'_> {
    /// Restart iteration after `seq`
    pub fn resume_after(&mut self, seq: u64) {
        self.after = seq;
        self.buffer.clear();
    }

    /// Seq of the last operation yielded
    pub fn position(&self) -> u64 {
        self.after
    }
}

impl Iterator for ChangeIter<'_> {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        if self.buffer.is_empty() {
            if self.after >= self.upto {
                return None;
            }
            let page = self
                .coordinator
                .list_changes(self.session, self.after, self.page_size)
                .ok()?;
            self.buffer = page.operations;
            self.buffer.reverse();
        }
        let op = self.buffer.pop()?;
        if op.seq > self.upto {
            self.buffer.clear();
            return None;
        }
        self.after = op.seq;
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{Claim, ClaimPath};

    fn main_view() -> ViewId {
        ViewId::new("main")
    }

    fn path(s: &str) -> ClaimPath {
        s.parse().unwrap()
    }

    fn coordinator() -> SessionCoordinator {
        let store = VersionedStore::in_memory();
        store.create_view(&main_view()).unwrap();
        SessionCoordinator::new(Arc::new(store))
    }

    fn add(key: &str, p: &str, text: &str) -> Vec<PatchOp> {
        vec![PatchOp::add(key, path(p), Claim::text(text))]
    }

    #[test]
    fn test_commit_roundtrip() {
        let coord = coordinator();
        let key = DocKey::new("q1");
        let s = coord.begin_edit(&main_view(), &key).unwrap();
        assert_eq!(coord.save_change(s, add("q1", "title", "Dune")).unwrap(), 1);
        assert_eq!(coord.save_change(s, add("q1", "year", "1965")).unwrap(), 2);

        let cs = coord.end_edit(s).unwrap();
        assert_eq!(cs.author_session_id, Some(s));
        assert_eq!(cs.patches.len(), 2);
        assert_eq!(coord.session(s).unwrap().status, SessionStatus::Committed);
        assert_eq!(coord.session(s).unwrap().changeset, Some(cs.id));
        assert_eq!(coord.store().get_latest(&main_view(), &key).unwrap().0.len(), 2);
    }

    #[test]
    fn test_second_committer_conflicts() {
        let coord = coordinator();
        let key = DocKey::new("q1");
        let a = coord.begin_edit(&main_view(), &key).unwrap();
        let b = coord.begin_edit(&main_view(), &key).unwrap();
        coord.save_change(a, add("q1", "title", "A")).unwrap();
        coord.save_change(b, add("q1", "title", "B")).unwrap();

        coord.end_edit(a).unwrap();
        let err = coord.end_edit(b).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(coord.session(b).unwrap().status, SessionStatus::Conflicted);
        assert!(matches!(
            coord.save_change(b, add("q1", "x", "y")),
            Err(FolioError::SessionClosed { .. })
        ));
        assert_eq!(coord.stats().conflicted, 1);
    }

    #[test]
    fn test_precondition_failure_rejects_session() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord
            .save_change(s, vec![PatchOp::remove("q1", path("title"))])
            .unwrap();
        assert!(coord.end_edit(s).unwrap_err().is_validation());
        assert_eq!(coord.session(s).unwrap().status, SessionStatus::Rejected);
        assert_eq!(coord.store().head(&main_view()).unwrap(), None);
    }

    #[test]
    fn test_empty_log_stays_open() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        assert!(coord.end_edit(s).unwrap_err().is_validation());
        assert_eq!(coord.session(s).unwrap().status, SessionStatus::Open);
    }

    #[test]
    fn test_save_change_rejects_foreign_key() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        assert!(coord
            .save_change(s, add("q2", "title", "x"))
            .unwrap_err()
            .is_validation());
        assert_eq!(coord.session(s).unwrap().operations, 0);
    }

    #[test]
    fn test_unknown_view_and_session() {
        let coord = coordinator();
        assert!(coord
            .begin_edit(&ViewId::new("nope"), &DocKey::new("q1"))
            .unwrap_err()
            .is_not_found());
        assert!(coord.end_edit(SessionId::new()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_discard_then_mutations_fail() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.save_change(s, add("q1", "title", "x")).unwrap();
        coord.discard_edit(s).unwrap();
        assert!(coord.discard_edit(s).is_err());
        assert!(coord.end_edit(s).is_err());
        // the log stays readable for audit
        assert_eq!(coord.list_changes(s, 0, 10).unwrap().operations.len(), 1);
    }

    #[test]
    fn test_list_changes_page_size_bounds() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        assert!(coord.list_changes(s, 0, 0).unwrap_err().is_validation());
        assert!(coord.list_changes(s, 0, 5001).unwrap_err().is_validation());
        assert!(coord.list_changes(s, 0, 5000).is_ok());
    }

    #[test]
    fn test_changes_iterator_restartable() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        for i in 0..5 {
            coord.save_change(s, add("q1", &format!("p{}", i), "x")).unwrap();
        }
        let mut iter = coord.changes(s, 2).unwrap();
        let seqs: Vec<u64> = iter.by_ref().map(|op| op.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

        iter.resume_after(3);
        let rest: Vec<u64> = iter.map(|op| op.seq).collect();
        assert_eq!(rest, vec![4, 5]);
    }

    #[test]
    fn test_changes_iterator_is_finite() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.save_change(s, add("q1", "a", "x")).unwrap();
        let mut iter = coord.changes(s, 1).unwrap();
        coord.save_change(s, add("q1", "b", "x")).unwrap();
        assert_eq!(iter.next().map(|op| op.seq), Some(1));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_open_sessions_and_purge() {
        let coord = coordinator();
        let a = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        let b = coord.begin_edit(&main_view(), &DocKey::new("q2")).unwrap();
        coord.discard_edit(a).unwrap();

        let open = coord.open_sessions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b);

        assert_eq!(coord.purge_closed(Duration::from_secs(3600)), 0);
        assert_eq!(coord.purge_closed(Duration::ZERO), 1);
        assert!(coord.session(a).unwrap_err().is_not_found());
        assert!(coord.session(b).is_ok());
    }

    #[test]
    fn test_stats() {
        let coord = coordinator();
        let a = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.save_change(a, add("q1", "title", "x")).unwrap();
        coord.end_edit(a).unwrap();
        let b = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.discard_edit(b).unwrap();

        let stats = coord.stats();
        assert_eq!(stats.begun, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.closed(), 2);
    }

    #[test]
    fn test_begin_edit_sweeps_expired_sessions() {
        let store = VersionedStore::in_memory();
        store.create_view(&main_view()).unwrap();
        let coord = SessionCoordinator::with_retention(Arc::new(store), Duration::ZERO);

        let a = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.save_change(a, add("q1", "title", "x")).unwrap();
        coord.end_edit(a).unwrap();
        let open = coord.begin_edit(&main_view(), &DocKey::new("q2")).unwrap();
        assert!(coord.session(a).unwrap_err().is_not_found());

        // open sessions survive any number of sweeps
        coord.begin_edit(&main_view(), &DocKey::new("q3")).unwrap();
        assert_eq!(coord.session(open).unwrap().status, SessionStatus::Open);
    }

    #[test]
    fn test_sweep_waits_for_retention_window() {
        let store = VersionedStore::in_memory();
        store.create_view(&main_view()).unwrap();
        let coord = SessionCoordinator::with_retention(Arc::new(store), Duration::from_secs(3600));

        let a = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.discard_edit(a).unwrap();
        coord.begin_edit(&main_view(), &DocKey::new("q2")).unwrap();
        assert_eq!(coord.session(a).unwrap().status, SessionStatus::Discarded);
    }

    #[test]
    fn test_closed_coordinator_refuses_writes() {
        let coord = coordinator();
        let s = coord.begin_edit(&main_view(), &DocKey::new("q1")).unwrap();
        coord.save_change(s, add("q1", "title", "x")).unwrap();
        coord.close();
        assert!(coord.is_closed());

        assert!(coord.begin_edit(&main_view(), &DocKey::new("q2")).unwrap_err().is_validation());
        assert!(coord.save_change(s, add("q1", "year", "1965")).unwrap_err().is_validation());
        assert!(coord.end_edit(s).unwrap_err().is_validation());
        assert_eq!(coord.store().head(&main_view()).unwrap(), None);

        // reads and discard still work
        assert_eq!(coord.session(s).unwrap().operations, 1);
        assert_eq!(coord.list_changes(s, 0, 10).unwrap().operations.len(), 1);
        coord.discard_edit(s).unwrap();
    }
}
