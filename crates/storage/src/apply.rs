//! All-or-nothing patch application
//!
//! Ops are applied in order to private copies of the touched documents.
//! Each op sees the effect of the ops before it, so `Add` followed by `Set`
//! on the same path is valid within one changeset. The first failing
//! precondition aborts the whole batch and the copies are dropped; nothing
//! is ever written to the backend from here.

use folio_core::{ClaimPath, DocKey, Document, FolioError, FolioResult, Patch, PatchOp};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Unmet patch precondition
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    /// `Add` on a path that already holds a claim
    #[error("patch #{index}: add {key}:{path} but the path already exists")]
    AlreadyExists {
        /// Position of the op in the batch
        index: usize,
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
    },
    /// `Set` or `Remove` on a path with no claim
    #[error("patch #{index}: {op} {key}:{path} but the path does not exist")]
    Missing {
        /// Position of the op in the batch
        index: usize,
        /// Op name
        op: &'static str,
        /// Target document
        key: DocKey,
        /// Target path
        path: ClaimPath,
    },
}

impl From<PatchError> for FolioError {
    fn from(e: PatchError) -> Self {
        FolioError::validation(e.to_string())
    }
}

/// Apply `ops` to staged copies, returning the recorded patches
///
/// `load` supplies the current state of a key (`None` if the key has no
/// history); it is called at most once per distinct key.
pub fn stage<F>(ops: Vec<PatchOp>, mut load: F) -> FolioResult<Vec<Patch>>
where
    F: FnMut(&DocKey) -> FolioResult<Option<Document>>,
{
    let mut staged: FxHashMap<DocKey, Document> = FxHashMap::default();
    let mut patches = Vec::with_capacity(ops.len());

    for (index, op) in ops.into_iter().enumerate() {
        if !staged.contains_key(op.key()) {
            let doc = load(op.key())?.unwrap_or_default();
            staged.insert(op.key().clone(), doc);
        }
        let doc = staged
            .get_mut(op.key())
            .ok_or_else(|| FolioError::fatal_store("staged document vanished"))?;
        patches.push(apply_one(index, op, doc)?);
    }

    Ok(patches)
}

fn apply_one(index: usize, op: PatchOp, doc: &mut Document) -> Result<Patch, PatchError> {
    match op {
        PatchOp::Add { key, path, claim } => {
            if doc.contains(&path) {
                return Err(PatchError::AlreadyExists { index, key, path });
            }
            doc.insert(path.clone(), claim.clone());
            Ok(Patch::Add { key, path, claim })
        }
        PatchOp::Set { key, path, claim } => match doc.insert(path.clone(), claim.clone()) {
            Some(before) => Ok(Patch::Set {
                key,
                path,
                before,
                after: claim,
            }),
            None => {
                doc.remove(&path);
                Err(PatchError::Missing {
                    index,
                    op: "set",
                    key,
                    path,
                })
            }
        },
        PatchOp::Remove { key, path } => match doc.remove(&path) {
            Some(before) => Ok(Patch::Remove { key, path, before }),
            None => Err(PatchError::Missing {
                index,
                op: "remove",
                key,
                path,
            }),
        },
    }
}
