//! Collaboration layer for Folio
//!
//! This crate implements edit sessions over the versioned store:
//! - EditSession: base head plus an append-only operation log
//! - SessionCoordinator: begin/save/list/end/discard, first committer wins
//! - validate_operation: shape checks applied on every save
//!
//! Sessions are optimistic. Saving an operation never touches the store;
//! the whole log is proposed as one changeset at `end_edit`, and a moved
//! view head turns into `Conflict`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod session;
pub mod validation;

pub use coordinator::{ChangeIter, CoordinatorStats, SessionCoordinator};
pub use session::{ChangePage, EditSession, Operation, SessionInfo, SessionStatus};
pub use validation::validate_operation;
