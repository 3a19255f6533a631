//! Operation validation
//!
//! Checks applied by `save_change`. They are structural only: nothing here
//! reads the store, so an operation accepted now can still be rejected at
//! commit if a precondition no longer holds.

use folio_core::{DocKey, FolioError, FolioResult, Limits, PatchOp};

/// Validate one operation submitted to a session editing `key`
///
/// - at least one patch, at most `limits.max_patches_per_operation`
/// - every patch targets the session's document
/// - every key, path and claim is well-formed
pub fn validate_operation(key: &DocKey, patches: &[PatchOp], limits: &Limits) -> FolioResult<()> {
    if patches.is_empty() {
        return Err(FolioError::validation("operation must contain at least one patch"));
    }
    if patches.len() > limits.max_patches_per_operation {
        return Err(FolioError::validation(format!(
            "operation has {} patches, limit is {}",
            patches.len(),
            limits.max_patches_per_operation
        )));
    }
    for (i, patch) in patches.iter().enumerate() {
        if patch.key() != key {
            return Err(FolioError::validation(format!(
                "patch #{} targets '{}' but the session edits '{}'",
                i,
                patch.key(),
                key
            )));
        }
        patch.validate(limits)?;
    }
    Ok(())
}
