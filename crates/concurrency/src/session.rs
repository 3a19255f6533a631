//! Edit sessions
//!
//! An edit session is an in-memory overlay on one document: a base head
//! captured at `begin_edit` plus an append-only log of operations. Nothing
//! reaches the store until the session is committed.
//!
//! ## State Machine
//!
//! ```text
//!            end_edit ok
//!   Open ───────────────────► Committed
//!    │  end_edit Conflict
//!    ├───────────────────────► Conflicted
//!    │  end_edit Validation
//!    ├───────────────────────► Rejected
//!    │  discard_edit
//!    └───────────────────────► Discarded
//! ```
//!
//! Every state except `Open` is terminal.

use folio_core::{
    ChangesetId, DocKey, FolioError, FolioResult, PatchOp, SessionId, Timestamp, ViewId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Accepting operations
    Open,
    /// Log committed as a changeset
    Committed,
    /// Abandoned by the client; the store was never touched
    Discarded,
    /// Commit lost the race for the view head
    Conflicted,
    /// Commit failed a patch precondition
    Rejected,
}

impl SessionStatus {
    /// Check if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Open => "open",
            SessionStatus::Committed => "committed",
            SessionStatus::Discarded => "discarded",
            SessionStatus::Conflicted => "conflicted",
            SessionStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// One client submission within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Position in the session log, starting at 1
    pub seq: u64,
    /// Proposed patches, applied in order at commit
    pub patches: Vec<PatchOp>,
    /// When the operation was saved
    pub submitted_at: Timestamp,
}

/// One page of a session log
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePage {
    /// Operations in seq order
    pub operations: Vec<Operation>,
    /// Pass as `after_seq` to fetch the next page; `None` when exhausted
    pub next_after: Option<u64>,
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// View being edited
    pub view: ViewId,
    /// Document being edited
    pub key: DocKey,
    /// View head captured at `begin_edit`
    pub base: Option<ChangesetId>,
    /// Current state
    pub status: SessionStatus,
    /// Number of operations in the log
    pub operations: usize,
    /// Changeset produced by a successful commit
    pub changeset: Option<ChangesetId>,
    /// Why the commit failed, for `Conflicted` and `Rejected`
    pub failure: Option<String>,
    /// When the session was opened
    pub opened_at: Timestamp,
    /// When the session reached a terminal state
    pub closed_at: Option<Timestamp>,
}

/// Coordinator-owned session state
#[derive(Debug)]
pub struct EditSession {
    id: SessionId,
    view: ViewId,
    key: DocKey,
    base: Option<ChangesetId>,
    log: Vec<Operation>,
    status: SessionStatus,
    changeset: Option<ChangesetId>,
    failure: Option<String>,
    opened_at: Timestamp,
    closed_at: Option<Timestamp>,
}

impl EditSession {
    /// Open a session on `key` based on `base`
    pub fn new(view: ViewId, key: DocKey, base: Option<ChangesetId>) -> Self {
        EditSession {
            id: SessionId::new(),
            view,
            key,
            base,
            log: Vec::new(),
            status: SessionStatus::Open,
            changeset: None,
            failure: None,
            opened_at: Timestamp::now(),
            closed_at: None,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// View being edited
    pub fn view(&self) -> &ViewId {
        &self.view
    }

    /// Document being edited
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// Head captured at open
    pub fn base(&self) -> Option<ChangesetId> {
        self.base
    }

    /// Current state
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// When the session closed, if it has
    pub fn closed_at(&self) -> Option<Timestamp> {
        self.closed_at
    }

    /// Number of logged operations
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Fail with `SessionClosed` unless open
    pub fn ensure_open(&self) -> FolioResult<()> {
        if self.status == SessionStatus::Open {
            Ok(())
        } else {
            Err(FolioError::session_closed(self.id, self.status))
        }
    }

    /// Append an operation, returning its seq
    pub fn append(&mut self, patches: Vec<PatchOp>) -> FolioResult<u64> {
        self.ensure_open()?;
        let seq = self.log.len() as u64 + 1;
        self.log.push(Operation {
            seq,
            patches,
            submitted_at: Timestamp::now(),
        });
        Ok(seq)
    }

    /// Up to `page_size` operations with seq greater than `after_seq`
    pub fn page(&self, after_seq: u64, page_size: usize) -> ChangePage {
        let start = usize::try_from(after_seq)
            .unwrap_or(usize::MAX)
            .min(self.log.len());
        let operations: Vec<Operation> = self.log[start..].iter().take(page_size).cloned().collect();
        let end = start + operations.len();
        let next_after = if end < self.log.len() {
            operations.last().map(|op| op.seq)
        } else {
            None
        };
        ChangePage {
            operations,
            next_after,
        }
    }

    /// The whole log as one patch list, in log order
    pub fn reduce(&self) -> Vec<PatchOp> {
        self.log
            .iter()
            .flat_map(|op| op.patches.iter().cloned())
            .collect()
    }

    /// `Open -> Committed`
    pub fn mark_committed(&mut self, changeset: ChangesetId) -> FolioResult<()> {
        self.close(SessionStatus::Committed)?;
        self.changeset = Some(changeset);
        Ok(())
    }

    /// `Open -> Conflicted`
    pub fn mark_conflicted(&mut self, reason: String) -> FolioResult<()> {
        self.close(SessionStatus::Conflicted)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// `Open -> Rejected`
    pub fn mark_rejected(&mut self, reason: String) -> FolioResult<()> {
        self.close(SessionStatus::Rejected)?;
        self.failure = Some(reason);
        Ok(())
    }

    /// `Open -> Discarded`
    pub fn mark_discarded(&mut self) -> FolioResult<()> {
        self.close(SessionStatus::Discarded)
    }

    fn close(&mut self, status: SessionStatus) -> FolioResult<()> {
        self.ensure_open()?;
        self.status = status;
        self.closed_at = Some(Timestamp::now());
        Ok(())
    }

    /// Snapshot for callers outside the coordinator
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            view: self.view.clone(),
            key: self.key.clone(),
            base: self.base,
            status: self.status,
            operations: self.log.len(),
            changeset: self.changeset,
            failure: self.failure.clone(),
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::Claim;

    fn session() -> EditSession {
        EditSession::new(ViewId::new("main"), DocKey::new("q1"), None)
    }

    fn op(n: usize) -> Vec<PatchOp> {
        vec![PatchOp::add(
            "q1",
            format!("p{}", n).parse().unwrap(),
            Claim::text("x"),
        )]
    }

    #[test]
    fn test_append_assigns_increasing_seq() {
        let mut s = session();
        assert_eq!(s.append(op(1)).unwrap(), 1);
        assert_eq!(s.append(op(2)).unwrap(), 2);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_pages_of_two() {
        let mut s = session();
        for i in 1..=5 {
            s.append(op(i)).unwrap();
        }
        let mut after = 0;
        let mut pages = Vec::new();
        loop {
            let page = s.page(after, 2);
            pages.push(page.operations.iter().map(|o| o.seq).collect::<Vec<_>>());
            match page.next_after {
                Some(next) => after = next,
                None => break,
            }
        }
        assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let mut s = session();
        s.append(op(1)).unwrap();
        let page = s.page(7, 10);
        assert!(page.operations.is_empty());
        assert_eq!(page.next_after, None);
    }

    #[test]
    fn test_reduce_keeps_log_order() {
        let mut s = session();
        s.append(op(1)).unwrap();
        s.append(vec![PatchOp::remove("q1", "p1".parse().unwrap())]).unwrap();
        let reduced = s.reduce();
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].name(), "add");
        assert_eq!(reduced[1].name(), "remove");
    }

    #[test]
    fn test_terminal_states_reject_mutation() {
        let mut s = session();
        s.mark_discarded().unwrap();
        assert!(s.status().is_terminal());
        assert!(s.closed_at().is_some());
        let err = s.append(op(1)).unwrap_err();
        assert!(matches!(err, FolioError::SessionClosed { .. }));
        assert!(s.mark_committed(ChangesetId::from_bytes([1; 32])).is_err());
        assert_eq!(s.status(), SessionStatus::Discarded);
    }

    #[test]
    fn test_info_reflects_outcome() {
        let mut s = session();
        s.append(op(1)).unwrap();
        s.mark_conflicted("head moved".into()).unwrap();
        let info = s.info();
        assert_eq!(info.status, SessionStatus::Conflicted);
        assert_eq!(info.operations, 1);
        assert_eq!(info.failure.as_deref(), Some("head moved"));
    }
}
