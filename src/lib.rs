//! Folio - versioned, collaboratively edited documents with search sync
//!
//! Folio keeps documents as sets of typed claims in branchable views.
//! Every change is an immutable, content-addressed changeset; editors work
//! in optimistic sessions; committed changesets stream into a search index
//! with seq-guarded bulk upserts.
//!
//! # Quick Start
//!
//! ```no_run
//! use folio::{Claim, Database, DocKey, PatchOp, ViewId};
//!
//! # fn main() -> folio::FolioResult<()> {
//! let db = Database::open("./data")?;
//! let main = ViewId::new("main");
//! let key = DocKey::new("q42");
//!
//! let session = db.coordinator().begin_edit(&main, &key)?;
//! db.coordinator().save_change(
//!     session,
//!     vec![PatchOp::add("q42", "title".parse()?, Claim::text("Dune"))],
//! )?;
//! let changeset = db.coordinator().end_edit(session)?;
//! println!("committed seq {}", changeset.seq);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `folio-core` | ids, claims, patches, changesets, errors |
//! | `folio-storage` | `VersionedStore` over memory or log backends |
//! | `folio-concurrency` | edit sessions and the `SessionCoordinator` |
//! | `folio-search` | index projection, `SearchIndex`, `IndexBridge` |
//! | `folio-engine` | `Database`, `folio.toml` |

pub use folio_concurrency::{
    ChangePage, CoordinatorStats, Operation, SessionCoordinator, SessionInfo, SessionStatus,
};
pub use folio_core::*;
pub use folio_engine::{BridgeSection, Database, FolioConfig, IndexBinding};
pub use folio_search::{
    BridgeConfig, BridgeStats, FailureRecord, IndexBridge, IndexDocument, MemoryIndex, SearchHit,
    SearchIndex, SyncReport,
};
pub use folio_storage::{Durability, HistoryPage, VersionedStore};
