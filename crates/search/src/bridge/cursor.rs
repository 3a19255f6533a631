//! Cursor advancement
//!
//! Workers finish changesets out of order. The tracker records how many
//! documents of each fetched changeset are still outstanding and moves the
//! watermark only across a gap-free prefix of finished changesets:
//!
//! ```text
//! cursor=4   pending: 5(0) 6(2) 7(0)    -> advance to 5, stop at 6
//!            pending: 6(0) 7(0)         -> advance to 7
//! ```
//!
//! "Finished" means flushed or recorded as failed. The tracker itself is
//! not synchronized; the bridge keeps it behind a single mutex.

use folio_core::{ChangesetId, ViewHead};
use std::collections::BTreeMap;

#[derive(Debug)]
struct Slot {
    id: ChangesetId,
    remaining: usize,
}

/// In-flight changesets and the watermark behind them
#[derive(Debug, Default)]
pub struct CursorTracker {
    position: Option<ViewHead>,
    pending: BTreeMap<u64, Slot>,
}

impl CursorTracker {
    /// Tracker starting at `position` (`None` = before the first changeset)
    pub fn new(position: Option<ViewHead>) -> Self {
        CursorTracker {
            position,
            pending: BTreeMap::new(),
        }
    }

    /// Watermark: every changeset up to here is finished
    pub fn position(&self) -> Option<ViewHead> {
        self.position
    }

    /// Changesets fetched but not yet passed by the watermark
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start tracking a changeset with `documents` outstanding documents
    ///
    /// Changesets at or below the watermark are ignored.
    pub fn register(&mut self, head: ViewHead, documents: usize) {
        if self.position.map_or(false, |p| head.seq <= p.seq) {
            return;
        }
        self.pending.insert(
            head.seq,
            Slot {
                id: head.id,
                remaining: documents,
            },
        );
    }

    /// Mark `count` documents of changeset `seq` as finished
    pub fn complete(&mut self, seq: u64, count: usize) {
        if let Some(slot) = self.pending.get_mut(&seq) {
            slot.remaining = slot.remaining.saturating_sub(count);
        }
    }

    /// Move the watermark across finished changesets
    ///
    /// Returns the new position if it moved.
    pub fn advance(&mut self) -> Option<ViewHead> {
        let mut moved = None;
        while let Some(entry) = self.pending.first_entry() {
            if entry.get().remaining > 0 {
                break;
            }
            let seq = *entry.key();
            let slot = entry.remove();
            moved = Some(ViewHead { id: slot.id, seq });
        }
        if moved.is_some() {
            self.position = moved;
        }
        moved
    }
}
