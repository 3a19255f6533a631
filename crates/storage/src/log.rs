//! Durable log backend
//!
//! `LogBackend` keeps the full state in a [`MemoryBackend`] and makes it
//! durable with an append-only record log (see [`crate::encoding`]). Every
//! mutation is written to the log inside the memory backend's critical
//! section, after its checks pass and before it becomes visible, so a record
//! that fails to write leaves no trace.
//!
//! On open the log is replayed from the start. A torn record at the tail
//! (crash mid-write) is truncated away; a bad record followed by more data
//! is corruption and fails the open.
//!
//! Cursor saves are coalesced. The newest cursor per `(view, index)` is held
//! in memory and written at most once per [`CURSOR_FLUSH_INTERVAL`], on
//! `sync` and on drop. After a crash the recovered cursor may trail the
//! index, which re-applies a few changesets under the seq guard.

use crate::backend::StoreBackend;
use crate::encoding::{decode_record, encode_record, LogError, LogRecord};
use crate::memory::MemoryBackend;
use folio_core::{
    BridgeCursor, Changeset, ChangesetId, DocKey, Document, FolioError, FolioResult, IndexId,
    ViewHead, ViewId,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Maximum time between syncs in batched mode
const BATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum records between syncs in batched mode
const BATCH_RECORDS: usize = 1000;

/// Minimum time between cursor records for a busy bridge
pub const CURSOR_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// When appended records are forced to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Sync after every record
    Always,
    /// Sync every 1000 records or 100ms, whichever comes first
    #[default]
    Batched,
}

impl Durability {
    /// Check if every record is synced before the call returns
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Durability::Always)
    }
}

/// What happened while replaying the log on open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records replayed
    pub records: usize,
    /// Changesets among them
    pub changesets: usize,
    /// Bytes cut from a torn tail
    pub truncated_bytes: u64,
}

struct LogWriter {
    file: BufWriter<File>,
    durability: Durability,
    last_sync: Instant,
    since_sync: usize,
    /// Set after a failed write; the tail may hold a partial record
    poisoned: bool,
}

impl LogWriter {
    fn append(&mut self, record: &LogRecord) -> Result<(), LogError> {
        if self.poisoned {
            return Err(LogError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "log writer disabled after an earlier write failure",
            )));
        }
        let bytes = encode_record(record)?;
        let written = self
            .file
            .write_all(&bytes)
            .and_then(|_| self.file.flush());
        if let Err(e) = written {
            self.poisoned = true;
            return Err(e.into());
        }

        self.since_sync += 1;
        let due = self.durability.requires_immediate_sync()
            || self.since_sync >= BATCH_RECORDS
            || self.last_sync.elapsed() >= BATCH_INTERVAL;
        if due {
            self.sync()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), LogError> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }
}

/// Cursors saved in memory but not yet written
struct PendingCursors {
    latest: FxHashMap<(ViewId, IndexId), BridgeCursor>,
    last_flush: Instant,
}

/// Durable [`StoreBackend`] backed by an append-only log file
pub struct LogBackend {
    memory: MemoryBackend,
    writer: Mutex<LogWriter>,
    /// Lock order: memory cursor entry, then `cursors`, then `writer`
    cursors: Mutex<PendingCursors>,
    path: PathBuf,
    recovery: RecoveryStats,
}

impl LogBackend {
    /// Open (or create) the log at `path` and replay it
    pub fn open(path: impl AsRef<Path>, durability: Durability) -> FolioResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let memory = MemoryBackend::new();
        let recovery = replay(&path, &memory)?;
        if recovery.records > 0 {
            info!(
                target: "folio::store",
                path = %path.display(),
                records = recovery.records,
                changesets = recovery.changesets,
                truncated_bytes = recovery.truncated_bytes,
                "Changeset log replayed"
            );
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(LogBackend {
            memory,
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                durability,
                last_sync: Instant::now(),
                since_sync: 0,
                poisoned: false,
            }),
            cursors: Mutex::new(PendingCursors {
                latest: FxHashMap::default(),
                last_flush: Instant::now(),
            }),
            path,
            recovery,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay statistics from the last open
    pub fn recovery(&self) -> &RecoveryStats {
        &self.recovery
    }

    fn append(&self, record: &LogRecord) -> FolioResult<()> {
        self.writer.lock().append(record).map_err(|e| {
            error!(target: "folio::store", error = %e, "Log append failed");
            FolioError::from(e)
        })
    }

    /// Write every pending cursor record
    fn flush_cursors(&self, pending: &mut PendingCursors) -> FolioResult<()> {
        let mut written = 0usize;
        for cursor in pending.latest.values() {
            self.append(&LogRecord::Cursor(cursor.clone()))?;
            written += 1;
        }
        pending.latest.clear();
        pending.last_flush = Instant::now();
        if written > 0 {
            debug!(target: "folio::store", cursors = written, "Cursor records written");
        }
        Ok(())
    }
}

/// Replay every intact record into `memory`, truncating a torn tail
fn replay(path: &Path, memory: &MemoryBackend) -> FolioResult<RecoveryStats> {
    let mut stats = RecoveryStats::default();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
        Err(e) => return Err(e.into()),
    };

    let mut offset = 0usize;
    while offset < bytes.len() {
        match decode_record(&bytes[offset..], offset as u64) {
            Ok((record, used)) => {
                if matches!(record, LogRecord::Changeset(_)) {
                    stats.changesets += 1;
                }
                apply_record(memory, record)?;
                stats.records += 1;
                offset += used;
            }
            Err(LogError::Incomplete { .. }) => break,
            Err(LogError::Corrupt { .. }) if reaches_end(&bytes[offset..]) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if offset < bytes.len() {
        stats.truncated_bytes = (bytes.len() - offset) as u64;
        warn!(
            target: "folio::store",
            path = %path.display(),
            offset,
            bytes = stats.truncated_bytes,
            "Truncating torn record at log tail"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }
    Ok(stats)
}

/// Whether the record starting at `buf[0]` claims to extend to (or past) EOF
fn reaches_end(buf: &[u8]) -> bool {
    if buf.len() < 4 {
        return true;
    }
    let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    4 + declared >= buf.len()
}

fn apply_record(memory: &MemoryBackend, record: LogRecord) -> FolioResult<()> {
    match record {
        LogRecord::ViewCreated { view } => {
            memory.create_view(&view)?;
        }
        LogRecord::Changeset(changeset) => {
            changeset.verify_id()?;
            let view = changeset.view_id.clone();
            let parent = changeset.parent_id;
            let seq = changeset.seq;
            memory
                .compare_and_append(&view, parent, changeset)
                .map_err(|e| {
                    if e.is_conflict() {
                        FolioError::fatal_store(format!(
                            "log changeset seq {} in view '{}' does not extend its head",
                            seq, view
                        ))
                    } else {
                        e
                    }
                })?;
        }
        LogRecord::Cursor(cursor) => {
            memory.save_cursor(&cursor)?;
        }
    }
    Ok(())
}

impl StoreBackend for LogBackend {
    fn create_view(&self, view: &ViewId) -> FolioResult<bool> {
        let created = self.memory.create_view_with(view, || {
            self.append(&LogRecord::ViewCreated { view: view.clone() })
        })?;
        if created {
            debug!(target: "folio::store", view = %view, "View record written");
        }
        Ok(created)
    }

    fn views(&self) -> Vec<ViewId> {
        self.memory.views()
    }

    fn head(&self, view: &ViewId) -> FolioResult<Option<ViewHead>> {
        self.memory.head(view)
    }

    fn document(&self, view: &ViewId, key: &DocKey) -> FolioResult<Option<(Document, ViewHead)>> {
        self.memory.document(view, key)
    }

    fn compare_and_append(
        &self,
        view: &ViewId,
        expected: Option<ChangesetId>,
        changeset: Changeset,
    ) -> FolioResult<Arc<Changeset>> {
        self.memory.append_with(view, expected, changeset, |cs| {
            self.append(&LogRecord::Changeset(cs.clone()))
        })
    }

    fn seq_of(&self, view: &ViewId, id: &ChangesetId) -> FolioResult<Option<u64>> {
        self.memory.seq_of(view, id)
    }

    fn changeset_at(&self, view: &ViewId, seq: u64) -> FolioResult<Option<Arc<Changeset>>> {
        self.memory.changeset_at(view, seq)
    }

    fn key_history(
        &self,
        view: &ViewId,
        key: &DocKey,
        before: Option<u64>,
        limit: usize,
    ) -> FolioResult<Vec<u64>> {
        self.memory.key_history(view, key, before, limit)
    }

    fn changesets_after(
        &self,
        view: &ViewId,
        after_seq: u64,
        limit: usize,
    ) -> FolioResult<Vec<Arc<Changeset>>> {
        self.memory.changesets_after(view, after_seq, limit)
    }

    fn keys(&self, view: &ViewId) -> FolioResult<Vec<DocKey>> {
        self.memory.keys(view)
    }

    fn load_cursor(&self, view: &ViewId, index: &IndexId) -> FolioResult<Option<BridgeCursor>> {
        self.memory.load_cursor(view, index)
    }

    fn save_cursor(&self, cursor: &BridgeCursor) -> FolioResult<()> {
        self.memory.save_cursor_with(cursor, |c| {
            let mut pending = self.cursors.lock();
            pending
                .latest
                .insert((c.view.clone(), c.index.clone()), c.clone());
            if pending.last_flush.elapsed() >= CURSOR_FLUSH_INTERVAL {
                self.flush_cursors(&mut pending)?;
            }
            Ok(())
        })
    }

    fn sync(&self) -> FolioResult<()> {
        {
            let mut pending = self.cursors.lock();
            self.flush_cursors(&mut pending)?;
        }
        self.writer.lock().sync().map_err(FolioError::from)
    }
}

impl Drop for LogBackend {
    fn drop(&mut self) {
        let writer = self.writer.get_mut();
        for cursor in self.cursors.get_mut().latest.values() {
            if let Err(e) = writer.append(&LogRecord::Cursor(cursor.clone())) {
                warn!(target: "folio::store", error = %e, "Cursor record lost on close");
                break;
            }
        }
        let _ = writer.sync();
    }
}
