//! Database struct and open/close logic
//!
//! `Database` wires the three services together:
//!
//! ```text
//!   SessionCoordinator ──propose──► VersionedStore ──► StoreBackend (log or memory)
//!                                        ▲
//!                    changesets_after ───┘  save_cursor
//!   IndexBridge (one per [[indexes]] entry) ──bulk_upsert──► SearchIndex
//! ```
//!
//! All services are explicit objects owned here and shared by `Arc`; there
//! is no process-wide registry. A data directory is guarded by an exclusive
//! lock file so two processes cannot append to the same log.

use crate::config::{FolioConfig, CONFIG_FILE_NAME, LOG_FILE_NAME};
use folio_concurrency::SessionCoordinator;
use folio_core::{EntityRef, FolioError, FolioResult, IndexId, ViewId};
use folio_search::{IndexBridge, MemoryIndex, SearchIndex, SyncReport};
use folio_storage::{LogBackend, MemoryBackend, RecoveryStats, StoreBackend, VersionedStore};
use parking_lot::RwLock;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Lock file placed in the data directory.
const LOCK_FILE_NAME: &str = ".lock";

/// Versioned document database with collaborative sessions and search sync
pub struct Database {
    /// Data directory (`None` for ephemeral databases)
    data_dir: Option<PathBuf>,
    config: FolioConfig,
    store: Arc<VersionedStore>,
    coordinator: Arc<SessionCoordinator>,
    index: Arc<dyn SearchIndex>,
    bridges: RwLock<Vec<Arc<IndexBridge>>>,
    recovery: Option<RecoveryStats>,
    open: AtomicBool,
    /// Held for the lifetime of the database; dropping it releases the lock
    _lock: Option<File>,
}

impl Database {
    /// Open (or create) a database in `path` with an in-memory search index.
    ///
    /// Writes a default `folio.toml` on first open, replays the changeset
    /// log, provisions the configured views and starts the bridges.
    pub fn open<P: AsRef<Path>>(path: P) -> FolioResult<Self> {
        Self::open_with_index(path, Arc::new(MemoryIndex::new()))
    }

    /// Open a database in `path` that feeds `index`.
    pub fn open_with_index<P: AsRef<Path>>(
        path: P,
        index: Arc<dyn SearchIndex>,
    ) -> FolioResult<Self> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        FolioConfig::write_default_if_missing(&config_path)?;
        let config = FolioConfig::from_file(&config_path)?;
        Self::open_dir(data_dir, config, index)
    }

    /// Open a database in `path` with an explicit configuration.
    ///
    /// The configuration is written to `folio.toml` so a later `open`
    /// picks up the same settings.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: FolioConfig,
        index: Arc<dyn SearchIndex>,
    ) -> FolioResult<Self> {
        config.validate()?;
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        config.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;
        Self::open_dir(data_dir, config, index)
    }

    /// Volatile database with default settings and an in-memory index.
    pub fn ephemeral() -> FolioResult<Self> {
        Self::ephemeral_with(FolioConfig::default(), Arc::new(MemoryIndex::new()))
    }

    /// Volatile database with explicit settings.
    pub fn ephemeral_with(config: FolioConfig, index: Arc<dyn SearchIndex>) -> FolioResult<Self> {
        config.validate()?;
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryBackend::new());
        Self::assemble(None, None, backend, None, config, index)
    }

    fn open_dir(
        data_dir: PathBuf,
        config: FolioConfig,
        index: Arc<dyn SearchIndex>,
    ) -> FolioResult<Self> {
        let lock = acquire_lock(&data_dir)?;

        let log = LogBackend::open(data_dir.join(LOG_FILE_NAME), config.durability)?;
        let recovery = log.recovery().clone();
        info!(
            target: "folio::engine",
            path = %data_dir.display(),
            records = recovery.records,
            changesets = recovery.changesets,
            truncated_bytes = recovery.truncated_bytes,
            "Recovery complete"
        );

        let backend: Arc<dyn StoreBackend> = Arc::new(log);
        Self::assemble(Some(data_dir), Some(lock), backend, Some(recovery), config, index)
    }

    fn assemble(
        data_dir: Option<PathBuf>,
        lock: Option<File>,
        backend: Arc<dyn StoreBackend>,
        recovery: Option<RecoveryStats>,
        config: FolioConfig,
        index: Arc<dyn SearchIndex>,
    ) -> FolioResult<Self> {
        let store = Arc::new(VersionedStore::new(backend));
        for view in config.view_ids() {
            store.create_view(&view)?;
        }
        let coordinator = Arc::new(SessionCoordinator::with_retention(
            Arc::clone(&store),
            config.sessions.retention(),
        ));

        let db = Database {
            data_dir,
            config,
            store,
            coordinator,
            index,
            bridges: RwLock::new(Vec::new()),
            recovery,
            open: AtomicBool::new(true),
            _lock: lock,
        };
        for binding in db.config.indexes.clone() {
            db.attach_index(&binding.view_id(), &binding.index_id())?;
        }

        info!(
            target: "folio::engine",
            views = db.config.views.len(),
            indexes = db.config.indexes.len(),
            ephemeral = db.data_dir.is_none(),
            "Database open"
        );
        Ok(db)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Versioned store
    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Session coordinator
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Search engine the bridges write to
    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Active configuration
    pub fn config(&self) -> &FolioConfig {
        &self.config
    }

    /// Data directory, `None` if ephemeral
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// What log replay found at open, `None` if ephemeral
    pub fn recovery(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    /// True until `shutdown`
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    // ========================================================================
    // Views and indexes
    // ========================================================================

    /// Provision a view at runtime (idempotent); returns `true` if created
    pub fn create_view(&self, view: &ViewId) -> FolioResult<bool> {
        self.ensure_open()?;
        self.store.create_view(view)
    }

    /// Start keeping `index` in step with `view`
    ///
    /// Resumes from the stored cursor for the pair. The background pipeline
    /// starts if `bridge.autostart` is set.
    pub fn attach_index(&self, view: &ViewId, index: &IndexId) -> FolioResult<Arc<IndexBridge>> {
        self.ensure_open()?;
        let mut bridges = self.bridges.write();
        if bridges
            .iter()
            .any(|b| b.view() == view && b.index_id() == index)
        {
            return Err(FolioError::validation(format!(
                "index '{}' is already attached to view '{}'",
                index, view
            )));
        }

        let bridge = Arc::new(IndexBridge::new(
            Arc::clone(&self.store),
            Arc::clone(&self.index),
            view.clone(),
            index.clone(),
            self.config.bridge.to_bridge_config(),
        )?);
        if self.config.bridge.autostart {
            bridge.start()?;
        }
        bridges.push(Arc::clone(&bridge));
        Ok(bridge)
    }

    /// Bridge for `(view, index)`
    pub fn bridge(&self, view: &ViewId, index: &IndexId) -> Option<Arc<IndexBridge>> {
        self.bridges
            .read()
            .iter()
            .find(|b| b.view() == view && b.index_id() == index)
            .cloned()
    }

    /// All bridges
    pub fn bridges(&self) -> Vec<Arc<IndexBridge>> {
        self.bridges.read().clone()
    }

    /// Run one synchronous catch-up pass on every bridge
    pub fn sync_indexes(&self) -> FolioResult<Vec<SyncReport>> {
        self.bridges().iter().map(|b| b.sync_now()).collect()
    }

    /// Rebuild `index` from the current documents of `view`
    ///
    /// Out-of-band repair for documents the bridge skipped. Fails with
    /// `NotFound` if `index` is not attached to `view`.
    pub fn reindex(&self, view: &ViewId, index: &IndexId) -> FolioResult<SyncReport> {
        let bridge = self.bridge(view, index).ok_or_else(|| {
            FolioError::not_found(EntityRef::Cursor {
                view: view.clone(),
                index: index.clone(),
            })
        })?;
        bridge.reindex()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the coordinator, stop the bridges and sync the log
    ///
    /// Idempotent. From here on sessions can be read and discarded but not
    /// opened, extended or committed, so the bridges drain a fixed head.
    pub fn shutdown(&self) -> FolioResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.coordinator.close();
        let open_sessions = self.coordinator.open_sessions().len();
        if open_sessions > 0 {
            warn!(target: "folio::engine", open_sessions, "Shutting down with open sessions");
        }

        let mut first_error = None;
        for bridge in self.bridges() {
            if let Err(e) = bridge.shutdown() {
                warn!(
                    target: "folio::engine",
                    view = %bridge.view(),
                    index = %bridge.index_id(),
                    error = %e,
                    "Bridge shutdown failed"
                );
                first_error.get_or_insert(e);
            }
        }
        self.store.sync()?;
        info!(target: "folio::engine", "Database shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> FolioResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FolioError::validation("database is shut down"))
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(target: "folio::engine", error = %e, "Shutdown on drop failed");
        }
    }
}

/// Take the exclusive lock on a data directory
fn acquire_lock(data_dir: &Path) -> FolioResult<File> {
    let lock_path = data_dir.join(LOCK_FILE_NAME);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|e| {
        FolioError::fatal_store_with_source(
            format!("database at '{}' is already in use", data_dir.display()),
            e,
        )
    })?;
    Ok(lock_file)
}
