//! Identifier types
//!
//! - `ViewId`: name of a view (a branch with one linear history)
//! - `DocKey`: opaque identifier of a versioned document
//! - `IndexId`: name of a search index fed by the bridge
//! - `ChangesetId`: content-derived identifier of a changeset
//! - `SessionId`: identifier of an edit session

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string-like value
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            /// Borrow the underlying string
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the underlying string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Name of a view
    ///
    /// A view is a named, mutable pointer to the head of one linear
    /// changeset history.
    ViewId
);

string_id!(
    /// Opaque document key
    ///
    /// Keys carry no structure the store interprets. Relations between
    /// documents are expressed as `DocKey` edges, never as nested documents.
    DocKey
);

string_id!(
    /// Name of a search index fed by the bridge
    IndexId
);

// ============================================================================
// ChangesetId
// ============================================================================

/// Content-derived changeset identifier (SHA-256)
///
/// Computed over the canonical encoding of everything else in the changeset,
/// so two changesets with the same id carry the same content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangesetId([u8; 32]);

impl ChangesetId {
    /// Wrap a raw digest
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        ChangesetId(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 chars)
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangesetId({})", self.short())
    }
}

/// Error returned when parsing a changeset id from hex
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid changeset id '{0}': expected 64 hex characters")]
pub struct ChangesetIdParseError(pub String);

impl FromStr for ChangesetId {
    type Err = ChangesetIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ChangesetIdParseError(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ChangesetIdParseError(s.to_string()))?;
        }
        Ok(ChangesetId(bytes))
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Edit session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        SessionId(uuid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
