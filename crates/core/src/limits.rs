//! Structural limits
//!
//! Limits are checked where data enters the system (session operations and
//! store proposals). Violations are reported as `FolioError::Validation`.

use crate::error::{FolioError, FolioResult};
use crate::types::DocKey;

/// Maximum number of operations returned by one `list_changes` page
pub const MAX_LIST_PAGE: usize = 5000;

/// Structural limits enforced at the edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum document key length in bytes (default: 512)
    pub max_key_bytes: usize,

    /// Maximum number of segments in a claim path (default: 16)
    pub max_path_segments: usize,

    /// Maximum bytes per claim path segment (default: 128)
    pub max_segment_bytes: usize,

    /// Maximum bytes of any string payload inside a claim (default: 64KB)
    pub max_text_bytes: usize,

    /// Maximum patches in one session operation (default: 1000)
    pub max_patches_per_operation: usize,

    /// Maximum patches in one changeset (default: 100_000)
    pub max_patches_per_changeset: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: 512,
            max_path_segments: 16,
            max_segment_bytes: 128,
            max_text_bytes: 64 * 1024,
            max_patches_per_operation: 1000,
            max_patches_per_changeset: 100_000,
        }
    }
}

impl Limits {
    /// Small limits for tests that exercise enforcement
    pub fn with_small_limits() -> Self {
        Limits {
            max_key_bytes: 16,
            max_path_segments: 3,
            max_segment_bytes: 8,
            max_text_bytes: 32,
            max_patches_per_operation: 4,
            max_patches_per_changeset: 8,
        }
    }

    /// Validate a document key
    pub fn validate_key(&self, key: &DocKey) -> FolioResult<()> {
        let len = key.as_str().len();
        if len == 0 {
            return Err(FolioError::validation("document key must not be empty"));
        }
        if len > self.max_key_bytes {
            return Err(FolioError::validation(format!(
                "document key is {} bytes, limit is {}",
                len, self.max_key_bytes
            )));
        }
        Ok(())
    }

    /// Validate a string payload length
    pub fn validate_text(&self, field: &str, value: &str) -> FolioResult<()> {
        if value.len() > self.max_text_bytes {
            return Err(FolioError::validation(format!(
                "{} is {} bytes, limit is {}",
                field,
                value.len(),
                self.max_text_bytes
            )));
        }
        Ok(())
    }
}
