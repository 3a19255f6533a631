//! Addressing inside a document's claim set
//!
//! A `ClaimPath` is a sequence of non-empty segments written with `/`
//! separators: `title`, `authors/0`, `identifiers/isbn`. Paths are flat keys
//! in the claim set; the store does not create or remove intermediate
//! containers, so `authors` and `authors/0` are independent entries.
//!
//! # Path Syntax
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `name` | single segment |
//! | `a/b/c` | nested segments |
//! | (empty), `a//b`, `/a`, `a/` | rejected |

use crate::error::{FolioError, FolioResult};
use crate::limits::Limits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for claim path parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathParseError {
    /// The path string was empty
    #[error("claim path must not be empty")]
    Empty,
    /// A segment between separators was empty
    #[error("empty segment at position {0}")]
    EmptySegment(usize),
    /// A pre-split segment contained the `/` separator
    #[error("separator inside segment {0}")]
    Separator(usize),
    /// A segment contained a control character
    #[error("control character in segment {0}")]
    ControlChar(usize),
}

/// Path of one claim inside a document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClaimPath {
    segments: Vec<String>,
}

impl ClaimPath {
    /// Build a path from pre-split segments
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathParseError::Empty);
        }
        for (i, seg) in segments.iter().enumerate() {
            if seg.is_empty() {
                return Err(PathParseError::EmptySegment(i));
            }
            if seg.contains('/') {
                return Err(PathParseError::Separator(i));
            }
            if seg.chars().any(char::is_control) {
                return Err(PathParseError::ControlChar(i));
            }
        }
        Ok(ClaimPath { segments })
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always at least one)
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; paths have at least one segment
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment, the property the claim belongs to
    pub fn property(&self) -> &str {
        &self.segments[0]
    }

    /// Append a segment (builder pattern)
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, PathParseError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        ClaimPath::from_segments(segments)
    }

    /// Parent path, `None` for single-segment paths
    pub fn parent(&self) -> Option<ClaimPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(ClaimPath { segments })
    }

    /// True if `self` is a prefix of `other` (or equal)
    pub fn is_ancestor_of(&self, other: &ClaimPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Check the path against structural limits
    pub fn validate(&self, limits: &Limits) -> FolioResult<()> {
        if self.segments.len() > limits.max_path_segments {
            return Err(FolioError::validation(format!(
                "claim path '{}' has {} segments, limit is {}",
                self,
                self.segments.len(),
                limits.max_path_segments
            )));
        }
        if let Some(seg) = self
            .segments
            .iter()
            .find(|s| s.len() > limits.max_segment_bytes)
        {
            return Err(FolioError::validation(format!(
                "claim path segment '{}' exceeds {} bytes",
                seg, limits.max_segment_bytes
            )));
        }
        Ok(())
    }
}

impl FromStr for ClaimPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathParseError::Empty);
        }
        ClaimPath::from_segments(s.split('/'))
    }
}

impl TryFrom<String> for ClaimPath {
    type Error = PathParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClaimPath> for String {
    fn from(path: ClaimPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for ClaimPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
