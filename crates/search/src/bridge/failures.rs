//! Bounded log of skipped documents
//!
//! Keeps the most recent failures for operators and the repair pass. Older
//! entries are evicted once the log is full; `total` keeps counting.

use folio_core::{DocKey, Timestamp};
use std::collections::VecDeque;

/// Which step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Reading or projecting the document
    Transform,
    /// Engine rejected the item
    Item,
    /// The whole bulk request failed or timed out
    Request,
}

/// One skipped document
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// Document key
    pub key: DocKey,
    /// Seq of the changeset being indexed
    pub seq: u64,
    /// Failing step
    pub stage: FailureStage,
    /// Error text
    pub reason: String,
    /// When it was recorded
    pub at: Timestamp,
}

/// Ring buffer of recent failures
#[derive(Debug)]
pub struct FailureLog {
    records: VecDeque<FailureRecord>,
    capacity: usize,
    total: u64,
}

impl FailureLog {
    /// Log keeping the last `capacity` failures
    pub fn new(capacity: usize) -> Self {
        FailureLog {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            total: 0,
        }
    }

    /// Append a failure, evicting the oldest if full
    pub fn record(&mut self, key: DocKey, seq: u64, stage: FailureStage, reason: String) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(FailureRecord {
            key,
            seq,
            stage,
            reason,
            at: Timestamp::now(),
        });
    }

    /// Retained failures, oldest first
    pub fn recent(&self) -> Vec<FailureRecord> {
        self.records.iter().cloned().collect()
    }

    /// Failures recorded since creation, including evicted ones
    pub fn total(&self) -> u64 {
        self.total
    }
}
