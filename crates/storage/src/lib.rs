//! Storage layer for Folio
//!
//! This crate implements the versioned document store:
//! - VersionedStore: changeset protocol (compare-and-set on the view head,
//!   all-or-nothing patch application, history and replay)
//! - StoreBackend: persistence contract
//! - MemoryBackend: DashMap of per-view state behind `RwLock`s
//! - LogBackend: MemoryBackend made durable with a CRC-framed record log
//!
//! # Concurrency
//!
//! Views are independent: each has its own commit lock and its own state
//! lock. Readers never wait on proposals for other views.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod backend;
pub mod encoding;
pub mod lineage;
pub mod log;
pub mod memory;
pub mod store;

pub use apply::PatchError;
pub use backend::StoreBackend;
pub use encoding::{LogError, LogRecord};
pub use lineage::Lineage;
pub use log::{Durability, LogBackend, RecoveryStats};
pub use memory::MemoryBackend;
pub use store::{HistoryPage, StoreStats, VersionedStore};
