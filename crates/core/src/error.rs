//! Error types for Folio
//!
//! One taxonomy is shared by the store, the session coordinator and the
//! index bridge. We use `thiserror` for `Display` and `Error` impls.
//!
//! | Variant | Raised by | Surfaces to |
//! |---------|-----------|-------------|
//! | `Validation` | malformed operation, unmet patch precondition | session caller |
//! | `Conflict` | view head moved past the session base | session caller |
//! | `NotFound` | unknown view, key, changeset, session | boundary layer |
//! | `SessionClosed` | mutation of a terminal session | session caller |
//! | `TransientIndex` | recoverable index write failure | absorbed by the bridge |
//! | `FatalStore` | backing store unavailable or corrupted | operator |

use crate::path::PathParseError;
use crate::types::{ChangesetId, DocKey, IndexId, SessionId, ViewId};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for Folio operations
pub type FolioResult<T> = std::result::Result<T, FolioError>;

/// Reference to the entity an error is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    /// A view
    View(ViewId),
    /// A document within a view
    Document {
        /// View the document lives in
        view: ViewId,
        /// Document key
        key: DocKey,
    },
    /// A changeset within a view
    Changeset {
        /// View the changeset belongs to
        view: ViewId,
        /// Changeset id
        id: ChangesetId,
    },
    /// An edit session
    Session(SessionId),
    /// A bridge cursor
    Cursor {
        /// View being synced
        view: ViewId,
        /// Target index
        index: IndexId,
    },
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::View(view) => write!(f, "view:{}", view),
            EntityRef::Document { view, key } => write!(f, "doc:{}/{}", view, key),
            EntityRef::Changeset { view, id } => write!(f, "changeset:{}/{}", view, id.short()),
            EntityRef::Session(id) => write!(f, "session:{}", id),
            EntityRef::Cursor { view, index } => write!(f, "cursor:{}->{}", view, index),
        }
    }
}

fn head_label(head: &Option<ChangesetId>) -> String {
    match head {
        Some(id) => id.short(),
        None => "<empty>".to_string(),
    }
}

/// Error type for Folio
#[derive(Debug, Error)]
pub enum FolioError {
    /// Malformed operation or patch, or an unmet patch precondition
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// The view head moved past the caller's base
    ///
    /// The caller must re-read the head and resubmit; no merge is attempted.
    #[error(
        "conflict on view '{view}': base {} but head is {}",
        head_label(.expected),
        head_label(.actual)
    )]
    Conflict {
        /// View whose head moved
        view: ViewId,
        /// Head the caller based its change on
        expected: Option<ChangesetId>,
        /// Head found at commit time
        actual: Option<ChangesetId>,
    },

    /// Unknown view, key, changeset, session or cursor
    #[error("not found: {entity}")]
    NotFound {
        /// What was looked up
        entity: EntityRef,
    },

    /// Mutation attempted on a session that is no longer open
    #[error("session {session} is closed ({status})")]
    SessionClosed {
        /// Session id
        session: SessionId,
        /// Terminal status the session is in
        status: String,
    },

    /// Recoverable index write failure (never escapes the bridge)
    #[error("transient index error: {message}")]
    TransientIndex {
        /// Description of the failure
        message: String,
    },

    /// Backing store unavailable or corrupted
    #[error("fatal store error: {message}")]
    FatalStore {
        /// Description of the fault
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Coarse classification of a [`FolioError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`FolioError::Validation`]
    Validation,
    /// See [`FolioError::Conflict`]
    Conflict,
    /// See [`FolioError::NotFound`]
    NotFound,
    /// See [`FolioError::SessionClosed`]
    SessionClosed,
    /// See [`FolioError::TransientIndex`]
    TransientIndex,
    /// See [`FolioError::FatalStore`]
    FatalStore,
}

impl FolioError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        FolioError::Validation {
            message: message.into(),
        }
    }

    /// Head mismatch on a view
    pub fn conflict(view: ViewId, expected: Option<ChangesetId>, actual: Option<ChangesetId>) -> Self {
        FolioError::Conflict {
            view,
            expected,
            actual,
        }
    }

    /// Unknown entity
    pub fn not_found(entity: EntityRef) -> Self {
        FolioError::NotFound { entity }
    }

    /// Unknown view
    pub fn view_not_found(view: &ViewId) -> Self {
        FolioError::not_found(EntityRef::View(view.clone()))
    }

    /// Unknown document in a view
    pub fn document_not_found(view: &ViewId, key: &DocKey) -> Self {
        FolioError::not_found(EntityRef::Document {
            view: view.clone(),
            key: key.clone(),
        })
    }

    /// Unknown changeset in a view
    pub fn changeset_not_found(view: &ViewId, id: &ChangesetId) -> Self {
        FolioError::not_found(EntityRef::Changeset {
            view: view.clone(),
            id: *id,
        })
    }

    /// Unknown session
    pub fn session_not_found(session: SessionId) -> Self {
        FolioError::not_found(EntityRef::Session(session))
    }

    /// Session no longer open
    pub fn session_closed(session: SessionId, status: impl fmt::Display) -> Self {
        FolioError::SessionClosed {
            session,
            status: status.to_string(),
        }
    }

    /// Recoverable index failure
    pub fn transient_index(message: impl Into<String>) -> Self {
        FolioError::TransientIndex {
            message: message.into(),
        }
    }

    /// Fatal store fault without an underlying error
    pub fn fatal_store(message: impl Into<String>) -> Self {
        FolioError::FatalStore {
            message: message.into(),
            source: None,
        }
    }

    /// Fatal store fault caused by another error
    pub fn fatal_store_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FolioError::FatalStore {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FolioError::Validation { .. } => ErrorKind::Validation,
            FolioError::Conflict { .. } => ErrorKind::Conflict,
            FolioError::NotFound { .. } => ErrorKind::NotFound,
            FolioError::SessionClosed { .. } => ErrorKind::SessionClosed,
            FolioError::TransientIndex { .. } => ErrorKind::TransientIndex,
            FolioError::FatalStore { .. } => ErrorKind::FatalStore,
        }
    }

    /// True for head-mismatch conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, FolioError::Conflict { .. })
    }

    /// True for validation failures
    pub fn is_validation(&self) -> bool {
        matches!(self, FolioError::Validation { .. })
    }

    /// True for not-found errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, FolioError::NotFound { .. })
    }

    /// True for operational faults that halt the affected subsystem
    pub fn is_fatal(&self) -> bool {
        matches!(self, FolioError::FatalStore { .. })
    }

    /// Whether the caller can succeed by refetching and trying again
    ///
    /// Conflicts are retried by re-reading the head and resubmitting intent;
    /// transient index errors by the out-of-band reindex pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FolioError::Conflict { .. } | FolioError::TransientIndex { .. }
        )
    }
}

impl From<io::Error> for FolioError {
    fn from(e: io::Error) -> Self {
        FolioError::fatal_store_with_source("I/O error", e)
    }
}

impl From<PathParseError> for FolioError {
    fn from(e: PathParseError) -> Self {
        FolioError::validation(format!("invalid claim path: {}", e))
    }
}

impl From<rmp_serde::encode::Error> for FolioError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FolioError::fatal_store_with_source("encoding failed", e)
    }
}

impl From<rmp_serde::decode::Error> for FolioError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FolioError::fatal_store_with_source("decoding failed", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = FolioError::validation("path 'title' already exists");
        let msg = err.to_string();
        assert!(msg.contains("validation failed"));
        assert!(msg.contains("title"));
    }

    #[test]
    fn test_error_display_conflict() {
        let expected = ChangesetId::from_bytes([0xaa; 32]);
        let actual = ChangesetId::from_bytes([0xbb; 32]);
        let err = FolioError::conflict(ViewId::new("main"), Some(expected), Some(actual));
        let msg = err.to_string();
        assert!(msg.contains("main"));
        assert!(msg.contains("aaaaaaaaaaaa"));
        assert!(msg.contains("bbbbbbbbbbbb"));
    }

    #[test]
    fn test_error_display_conflict_empty_base() {
        let err = FolioError::conflict(ViewId::new("main"), None, Some(ChangesetId::from_bytes([1; 32])));
        assert!(err.to_string().contains("<empty>"));
    }

    #[test]
    fn test_error_display_not_found() {
        let err = FolioError::document_not_found(&ViewId::new("main"), &DocKey::new("q42"));
        assert_eq!(err.to_string(), "not found: doc:main/q42");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(FolioError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            FolioError::session_closed(SessionId::new(), "Committed").kind(),
            ErrorKind::SessionClosed
        );
        assert_eq!(FolioError::transient_index("x").kind(), ErrorKind::TransientIndex);
        assert_eq!(FolioError::fatal_store("x").kind(), ErrorKind::FatalStore);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FolioError::conflict(ViewId::new("v"), None, None).is_retryable());
        assert!(FolioError::transient_index("timeout").is_retryable());
        assert!(!FolioError::validation("bad").is_retryable());
        assert!(!FolioError::fatal_store("disk").is_retryable());
    }

    #[test]
    fn test_from_io_is_fatal() {
        let err: FolioError = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert!(err.is_fatal());
        assert!(std::error::Error::source(&err).is_some());
    }
}
