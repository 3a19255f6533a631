//! Search layer for Folio
//!
//! This crate keeps search indexes in step with versioned views:
//! - IndexDocument: flat, seq-stamped projection of a document
//! - SearchIndex: bulk upsert / get / search / count contract
//! - MemoryIndex: in-process engine with an inverted index
//! - IndexBridge: cursor-driven pipeline from a view into an index
//!
//! Index errors stay inside this crate. The bridge records and skips them;
//! they never reach a committing client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod document;
pub mod index;
pub mod memory;
pub mod tokenizer;

pub use bridge::{
    BridgeConfig, BridgeStats, FailureRecord, FailureStage, IndexBridge, SyncReport,
};
pub use document::IndexDocument;
pub use index::{BulkItem, BulkRequest, BulkResponse, IndexError, ItemStatus, SearchHit, SearchIndex};
pub use memory::{MemoryIndex, MemoryIndexStats};
