//! Database engine for Folio
//!
//! This crate orchestrates all lower layers:
//! - Database: open/close, recovery, view provisioning
//! - Configuration via `folio.toml`
//! - Bridge lifecycle: one IndexBridge per configured (view, index) pair
//! - Out-of-band reindex
//!
//! The engine is the only component that knows about the data directory
//! and about how the store, coordinator and bridges fit together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;

pub use config::{
    BridgeSection, FolioConfig, IndexBinding, SessionsSection, CONFIG_FILE_NAME, LOG_FILE_NAME,
};
pub use database::Database;
