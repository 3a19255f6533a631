//! Changesets, view heads and bridge cursors
//!
//! A changeset is the immutable unit of history. Its id is the SHA-256 of
//! the MessagePack encoding of every other field, so identical content
//! always yields the identical id and any tampering is detectable with
//! [`Changeset::verify_id`].

use crate::error::{FolioError, FolioResult};
use crate::patch::Patch;
use crate::timestamp::Timestamp;
use crate::types::{ChangesetId, DocKey, IndexId, SessionId, ViewId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;

/// Immutable, content-identified set of applied patches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Content-derived id
    pub id: ChangesetId,
    /// Previous head of the view (`None` for the first changeset)
    pub parent_id: Option<ChangesetId>,
    /// View this changeset was committed to
    pub view_id: ViewId,
    /// 1-based position in the view's chain
    pub seq: u64,
    /// Applied patches in application order
    pub patches: Vec<Patch>,
    /// Commit time
    pub timestamp: Timestamp,
    /// Session that produced the changeset, if any
    pub author_session_id: Option<SessionId>,
}

/// Hashed portion of a changeset (everything except the id)
#[derive(Serialize)]
struct ChangesetContent<'a> {
    parent_id: &'a Option<ChangesetId>,
    view_id: &'a ViewId,
    seq: u64,
    patches: &'a [Patch],
    timestamp: Timestamp,
    author_session_id: &'a Option<SessionId>,
}

impl Changeset {
    /// Build a changeset and derive its id
    pub fn new(
        parent_id: Option<ChangesetId>,
        view_id: ViewId,
        seq: u64,
        patches: Vec<Patch>,
        timestamp: Timestamp,
        author_session_id: Option<SessionId>,
    ) -> FolioResult<Self> {
        let id = compute_id(
            &parent_id,
            &view_id,
            seq,
            &patches,
            timestamp,
            &author_session_id,
        )?;
        Ok(Changeset {
            id,
            parent_id,
            view_id,
            seq,
            patches,
            timestamp,
            author_session_id,
        })
    }

    /// Recompute the id and compare with the stored one
    pub fn verify_id(&self) -> FolioResult<()> {
        let expected = compute_id(
            &self.parent_id,
            &self.view_id,
            self.seq,
            &self.patches,
            self.timestamp,
            &self.author_session_id,
        )?;
        if expected != self.id {
            return Err(FolioError::fatal_store(format!(
                "changeset {} fails id check (content hashes to {})",
                self.id.short(),
                expected.short()
            )));
        }
        Ok(())
    }

    /// Distinct keys touched, in first-touch order
    pub fn touched_keys(&self) -> SmallVec<[DocKey; 4]> {
        let mut keys: SmallVec<[DocKey; 4]> = SmallVec::new();
        for patch in &self.patches {
            if !keys.contains(patch.key()) {
                keys.push(patch.key().clone());
            }
        }
        keys
    }

    /// Whether any patch targets `key`
    pub fn touches(&self, key: &DocKey) -> bool {
        self.patches.iter().any(|p| p.key() == key)
    }

    /// Patches targeting `key`, in application order
    pub fn patches_for<'a>(&'a self, key: &'a DocKey) -> impl Iterator<Item = &'a Patch> + 'a {
        self.patches.iter().filter(move |p| p.key() == key)
    }

    /// Head pointer naming this changeset
    pub fn head(&self) -> ViewHead {
        ViewHead {
            id: self.id,
            seq: self.seq,
        }
    }
}

fn compute_id(
    parent_id: &Option<ChangesetId>,
    view_id: &ViewId,
    seq: u64,
    patches: &[Patch],
    timestamp: Timestamp,
    author_session_id: &Option<SessionId>,
) -> FolioResult<ChangesetId> {
    let content = ChangesetContent {
        parent_id,
        view_id,
        seq,
        patches,
        timestamp,
        author_session_id,
    };
    let bytes = rmp_serde::to_vec_named(&content)?;
    let digest = Sha256::digest(&bytes);
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&digest);
    Ok(ChangesetId::from_bytes(raw))
}

/// Current head of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewHead {
    /// Head changeset
    pub id: ChangesetId,
    /// Its position in the chain
    pub seq: u64,
}

/// Durable watermark of the last changeset synced from a view to an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCursor {
    /// Source view
    pub view: ViewId,
    /// Target index
    pub index: IndexId,
    /// Last changeset whose documents were flushed or skipped
    pub last_changeset_id: ChangesetId,
    /// Seq of `last_changeset_id`
    pub last_seq: u64,
    /// When the cursor last moved
    pub updated_at: Timestamp,
}

impl BridgeCursor {
    /// Cursor pointing at `head`, stamped now
    pub fn at(view: ViewId, index: IndexId, head: ViewHead) -> Self {
        BridgeCursor {
            view,
            index,
            last_changeset_id: head.id,
            last_seq: head.seq,
            updated_at: Timestamp::now(),
        }
    }

    /// Head this cursor points at
    pub fn head(&self) -> ViewHead {
        ViewHead {
            id: self.last_changeset_id,
            seq: self.last_seq,
        }
    }
}
