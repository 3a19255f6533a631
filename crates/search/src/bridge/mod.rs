//! Search-index synchronization bridge
//!
//! Streams committed changesets of one view into one search index:
//!
//! ```text
//!   store ──changesets_after(cursor)──► feeder ──► WorkQueue (bounded)
//!                                                      │
//!                                  ┌───────────────────┼───────────────┐
//!                                  ▼                   ▼               ▼
//!                              worker 0            worker 1   ...  project touched docs
//!                                  └──────────► Batcher ◄──────────────┘
//!                                                  │ bulk_actions or flush_interval
//!                                                  ▼
//!                                     SearchIndex::bulk_upsert (seq-guarded)
//!                                                  │
//!                                                  ▼
//!                                  CursorTracker ──► store.save_cursor
//! ```
//!
//! A commit never waits on the bridge. Per-document failures (projection,
//! rejected item, failed or timed-out request) are recorded in the
//! [`FailureLog`] and skipped; the cursor still moves past them. Repair is
//! out of band, through [`IndexBridge::reindex`].
//!
//! Store faults are different: a failed read or cursor write halts the
//! bridge. The cursor stays where it was, the threads wind down and every
//! later pass returns the fault until a new bridge is created.
//!
//! Because every upsert carries its changeset's seq and the index only
//! keeps the highest seq per document, replays and out-of-order worker
//! completions converge on the newest state.

pub mod batcher;
pub mod cursor;
pub mod failures;
pub mod queue;

pub use batcher::Batcher;
pub use cursor::CursorTracker;
pub use failures::{FailureLog, FailureRecord, FailureStage};
pub use queue::WorkQueue;

use crate::document::IndexDocument;
use crate::index::{BulkRequest, IndexError, ItemStatus, SearchIndex};
use folio_core::{
    BridgeCursor, Changeset, ChangesetId, DocKey, FolioError, FolioResult, IndexId, ViewHead,
    ViewId,
};
use folio_storage::VersionedStore;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration and reports
// ============================================================================

/// Bridge tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Worker threads projecting documents
    pub workers: usize,
    /// Flush when this many documents are buffered
    pub bulk_actions: usize,
    /// Flush when the oldest buffered document has waited this long
    pub flush_interval: Duration,
    /// Deadline passed with every bulk request
    pub request_timeout: Duration,
    /// Changesets read from the store per fetch
    pub fetch_limit: usize,
    /// Feeder sleep when the view has nothing new
    pub poll_interval: Duration,
    /// Capacity of the feeder-to-worker queue
    pub queue_depth: usize,
    /// Failures retained for inspection
    pub failure_log_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            workers: 2,
            bulk_actions: 1000,
            flush_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            fetch_limit: 256,
            poll_interval: Duration::from_millis(200),
            queue_depth: 64,
            failure_log_capacity: 1024,
        }
    }
}

impl BridgeConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> FolioResult<()> {
        let positive = [
            ("workers", self.workers),
            ("bulk_actions", self.bulk_actions),
            ("fetch_limit", self.fetch_limit),
            ("queue_depth", self.queue_depth),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FolioError::validation(format!("bridge.{} must be at least 1", name)));
            }
        }
        let durations = [
            ("flush_interval", self.flush_interval),
            ("request_timeout", self.request_timeout),
            ("poll_interval", self.poll_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(FolioError::validation(format!("bridge.{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// What one pass (sync, replay, reindex) did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Changesets fetched
    pub changesets: u64,
    /// Documents projected
    pub documents: u64,
    /// Bulk requests sent
    pub flushes: u64,
    /// Items written
    pub applied: u64,
    /// Items skipped by the seq guard
    pub stale: u64,
    /// Documents recorded as failed
    pub failed: u64,
}

/// Bridge counters and position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    /// Counters since creation, across background and synchronous passes
    pub totals: SyncReport,
    /// Current watermark
    pub cursor: Option<ViewHead>,
    /// Changesets fetched but not yet passed by the watermark
    pub pending: usize,
    /// Changesets waiting in the work queue
    pub queued: usize,
    /// Background threads running
    pub running: bool,
    /// Store fault that halted the bridge
    pub halted: Option<String>,
}

#[derive(Default)]
struct Counters {
    changesets: AtomicU64,
    documents: AtomicU64,
    flushes: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn add(&self, r: &SyncReport) {
        self.changesets.fetch_add(r.changesets, Ordering::Relaxed);
        self.documents.fetch_add(r.documents, Ordering::Relaxed);
        self.flushes.fetch_add(r.flushes, Ordering::Relaxed);
        self.applied.fetch_add(r.applied, Ordering::Relaxed);
        self.stale.fetch_add(r.stale, Ordering::Relaxed);
        self.failed.fetch_add(r.failed, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SyncReport {
        SyncReport {
            changesets: self.changesets.load(Ordering::Relaxed),
            documents: self.documents.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

struct Shared {
    store: Arc<VersionedStore>,
    index: Arc<dyn SearchIndex>,
    view: ViewId,
    index_id: IndexId,
    config: BridgeConfig,
    queue: WorkQueue<Arc<Changeset>>,
    batcher: Mutex<Batcher<IndexDocument>>,
    tracker: Mutex<CursorTracker>,
    failures: Mutex<FailureLog>,
    /// Last changeset handed to the pipeline
    fetched: Mutex<Option<ViewHead>>,
    fault: Mutex<Option<String>>,
    stop: Mutex<bool>,
    wake: Condvar,
    counters: Counters,
}

impl Shared {
    /// Read the next page after the feed position and hand it on
    ///
    /// `inline` processes on the calling thread instead of queueing.
    /// Returns the number of changesets read.
    fn feed(&self, inline: bool, report: &mut SyncReport) -> FolioResult<usize> {
        self.check_fault()?;
        let mut fetched = self.fetched.lock();
        let after = fetched.map(|h| h.id);
        let page = self
            .store
            .changesets_after(&self.view, after.as_ref(), self.config.fetch_limit)
            .map_err(|e| self.halt(e))?;
        let count = page.len();

        for changeset in page {
            let head = changeset.head();
            self.tracker
                .lock()
                .register(head, changeset.touched_keys().len());
            *fetched = Some(head);
            report.changesets += 1;

            if inline {
                self.index_changeset(&changeset, report)?;
            } else if let Err(changeset) = self.queue.push(changeset) {
                // queue closed under us; finish it here so nothing is lost
                self.index_changeset(&changeset, report)?;
            }
        }
        Ok(count)
    }

    /// Project every document `changeset` touched into the shared batcher
    ///
    /// A store fault halts the bridge and leaves the changeset's slots open,
    /// so the cursor cannot pass it.
    fn index_changeset(
        &self,
        changeset: &Changeset,
        report: &mut SyncReport,
    ) -> FolioResult<()> {
        self.check_fault()?;
        let head = changeset.head();
        let keys = changeset.touched_keys();
        if keys.is_empty() {
            self.finish([(head.seq, 0)]);
            return Ok(());
        }

        for key in keys {
            let projected = self.project(changeset, &key).map_err(|e| self.halt(e))?;
            match projected {
                Ok(doc) => {
                    report.documents += 1;
                    let full = self.batcher.lock().push(doc);
                    if let Some(batch) = full {
                        self.flush(batch, true, report);
                    }
                }
                Err(e) => {
                    self.fail(key, head.seq, FailureStage::Transform, e.to_string(), report);
                    self.finish([(head.seq, 1)]);
                }
            }
        }
        Ok(())
    }

    /// Document `key` as of `changeset`, projected
    ///
    /// The outer error is a store fault; the inner one is a document the
    /// index cannot take.
    fn project(
        &self,
        changeset: &Changeset,
        key: &DocKey,
    ) -> FolioResult<Result<IndexDocument, IndexError>> {
        let doc = self.store.get_at_version(&self.view, key, &changeset.id)?;
        Ok(IndexDocument::project(&self.view, key, &doc, changeset.head()))
    }

    /// Send one bulk request; `track` feeds the results to the cursor
    fn flush(&self, batch: Vec<IndexDocument>, track: bool, report: &mut SyncReport) {
        let refs: Vec<(DocKey, u64)> = batch
            .iter()
            .map(|doc| (DocKey::new(doc.id.as_str()), doc.seq))
            .collect();
        let request = BulkRequest {
            actions: batch,
            timeout: self.config.request_timeout,
        };

        let started = Instant::now();
        let result = self.index.bulk_upsert(&self.index_id, request);
        report.flushes += 1;

        match result {
            Ok(response) => {
                let (mut applied, mut stale) = (0u64, 0u64);
                for (i, (key, seq)) in refs.iter().enumerate() {
                    match response.items.get(i).map(|item| &item.status) {
                        Some(ItemStatus::Applied) => applied += 1,
                        Some(ItemStatus::Stale { .. }) => stale += 1,
                        Some(ItemStatus::Failed { reason }) => {
                            self.fail(key.clone(), *seq, FailureStage::Item, reason.clone(), report)
                        }
                        None => self.fail(
                            key.clone(),
                            *seq,
                            FailureStage::Item,
                            "missing from bulk response".to_string(),
                            report,
                        ),
                    }
                }
                report.applied += applied;
                report.stale += stale;
                debug!(
                    target: "folio::bridge",
                    index = %self.index_id,
                    actions = refs.len(),
                    applied,
                    stale,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Bulk flush"
                );
            }
            Err(e) => {
                warn!(
                    target: "folio::bridge",
                    index = %self.index_id,
                    actions = refs.len(),
                    error = %e,
                    "Bulk request failed; skipping its documents"
                );
                for (key, seq) in &refs {
                    self.fail(key.clone(), *seq, FailureStage::Request, e.to_string(), report);
                }
            }
        }

        if track {
            self.finish(refs.iter().map(|(_, seq)| (*seq, 1)));
        }
    }

    /// Flush the shared batch if its oldest document has waited long enough
    fn flush_expired(&self, report: &mut SyncReport) {
        let expired = self.batcher.lock().take_expired(Instant::now());
        if let Some(batch) = expired {
            self.flush(batch, true, report);
        }
    }

    /// Flush whatever the shared batcher holds
    fn flush_buffered(&self, report: &mut SyncReport) {
        let buffered = self.batcher.lock().drain();
        if let Some(batch) = buffered {
            self.flush(batch, true, report);
        }
    }

    fn fail(&self, key: DocKey, seq: u64, stage: FailureStage, reason: String, report: &mut SyncReport) {
        warn!(
            target: "folio::bridge",
            view = %self.view,
            index = %self.index_id,
            key = %key,
            seq,
            stage = ?stage,
            reason = %reason,
            "Document skipped"
        );
        self.failures.lock().record(key, seq, stage, reason);
        report.failed += 1;
    }

    /// Mark documents finished and persist the cursor if it moved
    ///
    /// The tracker lock is held across the save so cursor writes for this
    /// pair are strictly ordered.
    fn finish(&self, done: impl IntoIterator<Item = (u64, usize)>) {
        let mut tracker = self.tracker.lock();
        for (seq, count) in done {
            tracker.complete(seq, count);
        }
        let Some(head) = tracker.advance() else {
            return;
        };
        let cursor = BridgeCursor::at(self.view.clone(), self.index_id.clone(), head);
        match self.store.save_cursor(&cursor) {
            Ok(()) => debug!(
                target: "folio::bridge",
                view = %self.view,
                index = %self.index_id,
                seq = head.seq,
                "Cursor advanced"
            ),
            Err(e) => {
                self.halt(e);
            }
        }
    }

    /// Record a store fault and stop the pipeline
    ///
    /// Only the first fault is kept. Returns `e` for propagation.
    fn halt(&self, e: FolioError) -> FolioError {
        {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                error!(
                    target: "folio::bridge",
                    view = %self.view,
                    index = %self.index_id,
                    error = %e,
                    "Store fault; bridge halted"
                );
                *fault = Some(e.to_string());
            }
        }
        {
            let mut stop = self.stop.lock();
            *stop = true;
            self.wake.notify_all();
        }
        self.queue.close();
        e
    }

    fn check_fault(&self) -> FolioResult<()> {
        match self.fault.lock().as_ref() {
            Some(reason) => Err(FolioError::fatal_store(format!(
                "bridge {} -> {} halted: {}",
                self.view, self.index_id, reason
            ))),
            None => Ok(()),
        }
    }

    fn stopping(&self) -> bool {
        *self.stop.lock()
    }

    fn sleep(&self, duration: Duration) {
        let mut stop = self.stop.lock();
        if !*stop {
            self.wake.wait_for(&mut stop, duration);
        }
    }
}

fn feeder_loop(shared: &Shared) {
    while !shared.stopping() {
        let mut report = SyncReport::default();
        // every feed error has halted the bridge and been logged
        let Ok(fed) = shared.feed(false, &mut report) else {
            shared.counters.add(&report);
            break;
        };
        shared.flush_expired(&mut report);
        shared.counters.add(&report);
        if fed < shared.config.fetch_limit {
            shared.sleep(shared.config.poll_interval);
        }
    }
}

fn worker_loop(shared: &Shared) {
    while let Some(changeset) = shared.queue.pop() {
        let mut report = SyncReport::default();
        if shared.index_changeset(&changeset, &mut report).is_ok() {
            shared.flush_expired(&mut report);
        }
        shared.counters.add(&report);
    }
}

// ============================================================================
// IndexBridge
// ============================================================================

/// Keeps one search index in step with one view
pub struct IndexBridge {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl IndexBridge {
    /// Bridge from `view` into `index_id`, resuming at the stored cursor
    pub fn new(
        store: Arc<VersionedStore>,
        index: Arc<dyn SearchIndex>,
        view: ViewId,
        index_id: IndexId,
        config: BridgeConfig,
    ) -> FolioResult<Self> {
        config.validate()?;
        store.head(&view)?;
        let position = store.load_cursor(&view, &index_id)?.map(|c| c.head());

        info!(
            target: "folio::bridge",
            view = %view,
            index = %index_id,
            cursor = ?position.map(|h| h.seq),
            "Bridge created"
        );

        let shared = Shared {
            queue: WorkQueue::new(config.queue_depth),
            batcher: Mutex::new(Batcher::new(config.bulk_actions, config.flush_interval)),
            tracker: Mutex::new(CursorTracker::new(position)),
            failures: Mutex::new(FailureLog::new(config.failure_log_capacity)),
            fetched: Mutex::new(position),
            fault: Mutex::new(None),
            stop: Mutex::new(false),
            wake: Condvar::new(),
            counters: Counters::default(),
            store,
            index,
            view,
            index_id,
            config,
        };
        Ok(IndexBridge {
            shared: Arc::new(shared),
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Source view
    pub fn view(&self) -> &ViewId {
        &self.shared.view
    }

    /// Target index
    pub fn index_id(&self) -> &IndexId {
        &self.shared.index_id
    }

    /// Current watermark
    pub fn cursor(&self) -> Option<ViewHead> {
        self.shared.tracker.lock().position()
    }

    /// Recently skipped documents, oldest first
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.shared.failures.lock().recent()
    }

    /// Counters and position
    pub fn stats(&self) -> BridgeStats {
        let tracker = self.shared.tracker.lock();
        BridgeStats {
            totals: self.shared.counters.snapshot(),
            cursor: tracker.position(),
            pending: tracker.pending(),
            queued: self.shared.queue.len(),
            running: self.started.load(Ordering::Acquire) && !self.shared.stopping(),
            halted: self.shared.fault.lock().clone(),
        }
    }

    /// Spawn the feeder and the worker pool
    ///
    /// A bridge runs at most once; after `shutdown` it only serves
    /// synchronous passes.
    pub fn start(&self) -> FolioResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(FolioError::validation(format!(
                "bridge {} -> {} already started",
                self.shared.view, self.shared.index_id
            )));
        }

        let mut threads = self.threads.lock();
        let shared = Arc::clone(&self.shared);
        threads.push(
            std::thread::Builder::new()
                .name(format!("folio-bridge-feed-{}", self.shared.index_id))
                .spawn(move || feeder_loop(&shared))?,
        );
        for i in 0..self.shared.config.workers {
            let shared = Arc::clone(&self.shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("folio-bridge-{}-{}", self.shared.index_id, i))
                    .spawn(move || worker_loop(&shared))?,
            );
        }

        info!(
            target: "folio::bridge",
            view = %self.shared.view,
            index = %self.shared.index_id,
            workers = self.shared.config.workers,
            "Bridge started"
        );
        Ok(())
    }

    /// Stop the pipeline and join its threads
    ///
    /// The feeder stops first, the workers drain the queue, then anything
    /// still buffered is flushed and the store synced.
    pub fn shutdown(&self) -> FolioResult<()> {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.wake.notify_all();
        }

        let mut threads = self.threads.lock();
        let was_running = !threads.is_empty();
        // feeder first: it is the only producer
        if !threads.is_empty() {
            let feeder = threads.remove(0);
            if feeder.join().is_err() {
                error!(target: "folio::bridge", index = %self.shared.index_id, "Feeder thread panicked");
            }
        }
        self.shared.queue.close();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!(target: "folio::bridge", index = %self.shared.index_id, "Worker thread panicked");
            }
        }
        drop(threads);

        let mut report = SyncReport::default();
        if self.shared.check_fault().is_ok() {
            self.shared.flush_buffered(&mut report);
        }
        self.shared.counters.add(&report);
        self.shared.store.sync()?;

        if was_running {
            info!(
                target: "folio::bridge",
                view = %self.shared.view,
                index = %self.shared.index_id,
                cursor = ?self.cursor().map(|h| h.seq),
                "Bridge stopped"
            );
        }
        Ok(())
    }

    /// Catch up with the view head on the calling thread
    ///
    /// Reads every changeset past the feed position, indexes it and flushes
    /// the remainder. With the background pipeline stopped, the cursor is
    /// at the observed head when this returns. Fails with `FatalStore` once
    /// the bridge has halted.
    pub fn sync_now(&self) -> FolioResult<SyncReport> {
        let mut report = SyncReport::default();
        let result = self.catch_up(&mut report);
        self.shared.counters.add(&report);
        result?;

        debug!(
            target: "folio::bridge",
            view = %self.shared.view,
            index = %self.shared.index_id,
            changesets = report.changesets,
            flushes = report.flushes,
            failed = report.failed,
            "Sync pass complete"
        );
        Ok(report)
    }

    fn catch_up(&self, report: &mut SyncReport) -> FolioResult<()> {
        while self.shared.feed(true, report)? == self.shared.config.fetch_limit {}
        self.shared.flush_buffered(report);
        self.shared.check_fault()
    }

    /// Push changesets after `after` through the index again
    ///
    /// Out-of-band: the cursor is neither read nor moved. The seq guard
    /// makes the pass idempotent.
    pub fn replay(&self, after: Option<&ChangesetId>) -> FolioResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut batcher = self.local_batcher();
        let mut position = after.copied();

        loop {
            let page = self.shared.store.changesets_after(
                &self.shared.view,
                position.as_ref(),
                self.shared.config.fetch_limit,
            )?;
            let Some(last) = page.last() else {
                break;
            };
            position = Some(last.id);

            for changeset in &page {
                report.changesets += 1;
                for key in changeset.touched_keys() {
                    let projected = self.shared.project(changeset, &key)?;
                    self.push_untracked(&mut batcher, key, changeset.seq, projected, &mut report);
                }
            }
            if page.len() < self.shared.config.fetch_limit {
                break;
            }
        }
        if let Some(batch) = batcher.drain() {
            self.shared.flush(batch, false, &mut report);
        }

        self.shared.counters.add(&report);
        info!(
            target: "folio::bridge",
            view = %self.shared.view,
            index = %self.shared.index_id,
            changesets = report.changesets,
            applied = report.applied,
            stale = report.stale,
            "Replay complete"
        );
        Ok(report)
    }

    /// Upsert every current document at the seq that last touched it
    ///
    /// Repairs documents skipped by earlier failures. Out-of-band like
    /// [`replay`](Self::replay).
    pub fn reindex(&self) -> FolioResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut batcher = self.local_batcher();

        for (key, document, head) in self.shared.store.documents(&self.shared.view)? {
            let projected = IndexDocument::project(&self.shared.view, &key, &document, head);
            self.push_untracked(&mut batcher, key, head.seq, projected, &mut report);
        }
        if let Some(batch) = batcher.drain() {
            self.shared.flush(batch, false, &mut report);
        }

        self.shared.counters.add(&report);
        info!(
            target: "folio::bridge",
            view = %self.shared.view,
            index = %self.shared.index_id,
            documents = report.documents,
            applied = report.applied,
            failed = report.failed,
            "Reindex complete"
        );
        Ok(report)
    }

    fn local_batcher(&self) -> Batcher<IndexDocument> {
        Batcher::new(self.shared.config.bulk_actions, self.shared.config.flush_interval)
    }

    fn push_untracked(
        &self,
        batcher: &mut Batcher<IndexDocument>,
        key: DocKey,
        seq: u64,
        projected: Result<IndexDocument, IndexError>,
        report: &mut SyncReport,
    ) {
        match projected {
            Ok(doc) => {
                report.documents += 1;
                if let Some(batch) = batcher.push(doc) {
                    self.shared.flush(batch, false, report);
                }
            }
            Err(e) => {
                self.shared
                    .fail(key, seq, FailureStage::Transform, e.to_string(), report)
            }
        }
    }
}

impl Drop for IndexBridge {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(
                target: "folio::bridge",
                index = %self.shared.index_id,
                error = %e,
                "Shutdown on drop failed"
            );
        }
    }
}
