//! Core types for Folio
//!
//! This crate defines the foundational types shared by every layer:
//! - Identifiers: ViewId, DocKey, ChangesetId, SessionId, IndexId
//! - Timestamp: microsecond wall-clock time
//! - Claims: the closed set of typed facts a document carries
//! - ClaimPath: addressing inside a document's claim set
//! - PatchOp / Patch: proposed and applied changes (forward + backward payloads)
//! - Changeset / ViewHead / BridgeCursor: persisted history records
//! - FolioError: error taxonomy shared by store, sessions and the index bridge
//! - Limits: structural bounds enforced at the edges

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changeset;
pub mod claim;
pub mod error;
pub mod limits;
pub mod patch;
pub mod path;
pub mod timestamp;
pub mod types;

pub use changeset::{BridgeCursor, Changeset, ViewHead};
pub use claim::{Claim, ClaimKind, Document};
pub use error::{EntityRef, ErrorKind, FolioError, FolioResult};
pub use limits::Limits;
pub use patch::{Patch, PatchOp};
pub use path::{ClaimPath, PathParseError};
pub use timestamp::Timestamp;
pub use types::{ChangesetId, DocKey, IndexId, SessionId, ViewId};
