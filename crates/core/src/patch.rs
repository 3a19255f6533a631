//! Patches
//!
//! Clients propose [`PatchOp`]s, which carry only the forward payload. When
//! the store applies an op it records a [`Patch`], which also carries the
//! backward payload captured from the pre-patch state. A recorded patch can
//! therefore be replayed forward (history reconstruction) or inverted (undo)
//! without consulting any other changeset.
//!
//! Preconditions checked at apply time:
//!
//! | Op | Requires |
//! |----|----------|
//! | `Add` | path absent |
//! | `Set` | path present |
//! | `Remove` | path present |

use crate::claim::{Claim, Document};
use crate::error::FolioResult;
use crate::limits::Limits;
use crate::path::ClaimPath;
use crate::types::DocKey;
use serde::{Deserialize, Serialize};

/// A proposed change to one path of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    /// Create a claim at a path that does not exist yet
    Add {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
        /// New claim
        claim: Claim,
    },
    /// Replace the claim at an existing path
    Set {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
        /// Replacement claim
        claim: Claim,
    },
    /// Delete the claim at an existing path
    Remove {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
    },
}

impl PatchOp {
    /// Shorthand for `Add`
    pub fn add(key: impl Into<DocKey>, path: ClaimPath, claim: Claim) -> Self {
        PatchOp::Add {
            key: key.into(),
            path,
            claim,
        }
    }

    /// Shorthand for `Set`
    pub fn set(key: impl Into<DocKey>, path: ClaimPath, claim: Claim) -> Self {
        PatchOp::Set {
            key: key.into(),
            path,
            claim,
        }
    }

    /// Shorthand for `Remove`
    pub fn remove(key: impl Into<DocKey>, path: ClaimPath) -> Self {
        PatchOp::Remove {
            key: key.into(),
            path,
        }
    }

    /// Target document
    pub fn key(&self) -> &DocKey {
        match self {
            PatchOp::Add { key, .. } | PatchOp::Set { key, .. } | PatchOp::Remove { key, .. } => key,
        }
    }

    /// Target path
    pub fn path(&self) -> &ClaimPath {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Set { path, .. } | PatchOp::Remove { path, .. } => {
                path
            }
        }
    }

    /// Claim written by this op, if any
    pub fn claim(&self) -> Option<&Claim> {
        match self {
            PatchOp::Add { claim, .. } | PatchOp::Set { claim, .. } => Some(claim),
            PatchOp::Remove { .. } => None,
        }
    }

    /// Lowercase op name for messages
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Set { .. } => "set",
            PatchOp::Remove { .. } => "remove",
        }
    }

    /// Shape validation: key, path and claim are well-formed
    ///
    /// Does not look at any stored state.
    pub fn validate(&self, limits: &Limits) -> FolioResult<()> {
        limits.validate_key(self.key())?;
        self.path().validate(limits)?;
        if let Some(claim) = self.claim() {
            claim.validate(limits)?;
        }
        Ok(())
    }
}

/// An applied change, carrying forward and backward payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Patch {
    /// Claim created; undo removes it
    Add {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
        /// Claim written
        claim: Claim,
    },
    /// Claim replaced; undo restores `before`
    Set {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
        /// Claim present before the patch
        before: Claim,
        /// Claim present after the patch
        after: Claim,
    },
    /// Claim deleted; undo restores `before`
    Remove {
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
        /// Claim present before the patch
        before: Claim,
    },
}

impl Patch {
    /// Target document
    pub fn key(&self) -> &DocKey {
        match self {
            Patch::Add { key, .. } | Patch::Set { key, .. } | Patch::Remove { key, .. } => key,
        }
    }

    /// Target path
    pub fn path(&self) -> &ClaimPath {
        match self {
            Patch::Add { path, .. } | Patch::Set { path, .. } | Patch::Remove { path, .. } => path,
        }
    }

    /// Claim at the path after the patch
    pub fn forward(&self) -> Option<&Claim> {
        match self {
            Patch::Add { claim, .. } => Some(claim),
            Patch::Set { after, .. } => Some(after),
            Patch::Remove { .. } => None,
        }
    }

    /// Claim at the path before the patch
    pub fn backward(&self) -> Option<&Claim> {
        match self {
            Patch::Add { .. } => None,
            Patch::Set { before, .. } | Patch::Remove { before, .. } => Some(before),
        }
    }

    /// The patch that undoes this one
    pub fn invert(&self) -> Patch {
        match self.clone() {
            Patch::Add { key, path, claim } => Patch::Remove {
                key,
                path,
                before: claim,
            },
            Patch::Set {
                key,
                path,
                before,
                after,
            } => Patch::Set {
                key,
                path,
                before: after,
                after: before,
            },
            Patch::Remove { key, path, before } => Patch::Add {
                key,
                path,
                claim: before,
            },
        }
    }

    /// Apply the forward payload without checking preconditions
    ///
    /// Used when replaying history: preconditions held when the patch was
    /// recorded, and the chain is replayed in the same order.
    pub fn replay(&self, doc: &mut Document) {
        match self {
            Patch::Add { path, claim, .. } => {
                doc.insert(path.clone(), claim.clone());
            }
            Patch::Set { path, after, .. } => {
                doc.insert(path.clone(), after.clone());
            }
            Patch::Remove { path, .. } => {
                doc.remove(path);
            }
        }
    }
}
