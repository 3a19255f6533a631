//! Claims and documents
//!
//! A document is a set of claims addressed by [`ClaimPath`]. Each claim is a
//! typed fact drawn from a closed set of kinds. Adding a kind means touching
//! every `match` over [`Claim`]; the compiler points at each site.
//!
//! Claims that point at other documents (`Relation`) hold the target's
//! [`DocKey`] only. Targets are resolved by lookup, so documents never own
//! one another and reference cycles cannot form in memory.

use crate::error::{FolioError, FolioResult};
use crate::limits::Limits;
use crate::path::ClaimPath;
use crate::types::DocKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Discriminant of a [`Claim`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// External identifier (ISBN, DOI, ...)
    Identifier,
    /// Free text, optionally tagged with a language
    Text,
    /// Typed edge to another document
    Relation,
    /// Numeric quantity with optional unit
    Amount,
    /// Point in time
    Time,
    /// Attached file metadata
    File,
    /// External URL reference
    Reference,
    /// Boolean flag
    Flag,
}

impl ClaimKind {
    /// Stable lowercase name, used as the index field type
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Identifier => "identifier",
            ClaimKind::Text => "text",
            ClaimKind::Relation => "relation",
            ClaimKind::Amount => "amount",
            ClaimKind::Time => "time",
            ClaimKind::File => "file",
            ClaimKind::Reference => "reference",
            ClaimKind::Flag => "flag",
        }
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed fact attached to a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Claim {
    /// External identifier
    Identifier {
        /// Identifier scheme, e.g. `isbn`
        scheme: String,
        /// Identifier value
        value: String,
    },
    /// Free text
    Text {
        /// Text content
        value: String,
        /// BCP-47 language tag, if known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Edge to another document
    Relation {
        /// Relation predicate, e.g. `author`
        predicate: String,
        /// Target document
        target: DocKey,
    },
    /// Quantity
    Amount {
        /// Numeric value (finite)
        value: f64,
        /// Unit, e.g. `EUR` or `kg`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// Point in time
    Time {
        /// UTC instant
        value: DateTime<Utc>,
    },
    /// File attachment metadata
    File {
        /// File name
        name: String,
        /// Media type, e.g. `application/pdf`
        media_type: String,
        /// Size in bytes
        size: u64,
        /// Hex SHA-256 of the content
        sha256: String,
    },
    /// External reference
    Reference {
        /// Target URL
        url: String,
        /// Display title
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Boolean flag
    Flag {
        /// Flag value
        value: bool,
    },
}

impl Claim {
    /// Shorthand for a text claim without language
    pub fn text(value: impl Into<String>) -> Self {
        Claim::Text {
            value: value.into(),
            language: None,
        }
    }

    /// Shorthand for an identifier claim
    pub fn identifier(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Claim::Identifier {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a relation claim
    pub fn relation(predicate: impl Into<String>, target: impl Into<DocKey>) -> Self {
        Claim::Relation {
            predicate: predicate.into(),
            target: target.into(),
        }
    }

    /// Shorthand for an amount claim
    pub fn amount(value: f64, unit: Option<&str>) -> Self {
        Claim::Amount {
            value,
            unit: unit.map(str::to_string),
        }
    }

    /// Kind of this claim
    pub fn kind(&self) -> ClaimKind {
        match self {
            Claim::Identifier { .. } => ClaimKind::Identifier,
            Claim::Text { .. } => ClaimKind::Text,
            Claim::Relation { .. } => ClaimKind::Relation,
            Claim::Amount { .. } => ClaimKind::Amount,
            Claim::Time { .. } => ClaimKind::Time,
            Claim::File { .. } => ClaimKind::File,
            Claim::Reference { .. } => ClaimKind::Reference,
            Claim::Flag { .. } => ClaimKind::Flag,
        }
    }

    /// Target document of a relation claim
    pub fn target(&self) -> Option<&DocKey> {
        match self {
            Claim::Relation { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Structural validation (shape only, no cross-document checks)
    pub fn validate(&self, limits: &Limits) -> FolioResult<()> {
        match self {
            Claim::Identifier { scheme, value } => {
                require_non_empty("identifier scheme", scheme)?;
                require_non_empty("identifier value", value)?;
                limits.validate_text("identifier value", value)
            }
            Claim::Text { value, language } => {
                limits.validate_text("text", value)?;
                if let Some(lang) = language {
                    require_non_empty("text language", lang)?;
                }
                Ok(())
            }
            Claim::Relation { predicate, target } => {
                require_non_empty("relation predicate", predicate)?;
                limits.validate_key(target)
            }
            Claim::Amount { value, unit } => {
                if !value.is_finite() {
                    return Err(FolioError::validation(format!(
                        "amount must be finite, got {}",
                        value
                    )));
                }
                if let Some(unit) = unit {
                    require_non_empty("amount unit", unit)?;
                }
                Ok(())
            }
            Claim::Time { .. } => Ok(()),
            Claim::File {
                name,
                media_type,
                sha256,
                ..
            } => {
                require_non_empty("file name", name)?;
                if !media_type.contains('/') {
                    return Err(FolioError::validation(format!(
                        "file media type '{}' is not of the form type/subtype",
                        media_type
                    )));
                }
                if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(FolioError::validation("file sha256 must be 64 hex characters"));
                }
                Ok(())
            }
            Claim::Reference { url, title } => {
                if !url.contains("://") {
                    return Err(FolioError::validation(format!(
                        "reference url '{}' has no scheme",
                        url
                    )));
                }
                limits.validate_text("reference url", url)?;
                if let Some(title) = title {
                    limits.validate_text("reference title", title)?;
                }
                Ok(())
            }
            Claim::Flag { .. } => Ok(()),
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> FolioResult<()> {
    if value.trim().is_empty() {
        return Err(FolioError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============================================================================
// Document
// ============================================================================

/// A document: the claim set of one key at one point in history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    claims: BTreeMap<ClaimPath, Claim>,
}

impl Document {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim at `path`
    pub fn get(&self, path: &ClaimPath) -> Option<&Claim> {
        self.claims.get(path)
    }

    /// Whether a claim exists at `path`
    pub fn contains(&self, path: &ClaimPath) -> bool {
        self.claims.contains_key(path)
    }

    /// Insert or replace, returning the previous claim
    pub fn insert(&mut self, path: ClaimPath, claim: Claim) -> Option<Claim> {
        self.claims.insert(path, claim)
    }

    /// Remove, returning the removed claim
    pub fn remove(&mut self, path: &ClaimPath) -> Option<Claim> {
        self.claims.remove(path)
    }

    /// Number of claims
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// True if no claims
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Claims in path order
    pub fn iter(&self) -> impl Iterator<Item = (&ClaimPath, &Claim)> {
        self.claims.iter()
    }

    /// Documents this one points at, deduplicated, in key order
    pub fn relations(&self) -> Vec<DocKey> {
        let mut targets: Vec<DocKey> = self
            .claims
            .values()
            .filter_map(Claim::target)
            .cloned()
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

impl FromIterator<(ClaimPath, Claim)> for Document {
    fn from_iter<T: IntoIterator<Item = (ClaimPath, Claim)>>(iter: T) -> Self {
        Document {
            claims: iter.into_iter().collect(),
        }
    }
}
