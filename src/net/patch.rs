//! Structural diff-op application
//!
//! A diff-op adds, replaces or removes one value at a JSON pointer path
//! (`/players/0/deck`). The patch stream folds a sequence of these over the
//! previous known record of a game. Any op that addresses a path which does
//! not exist is rejected; nothing is silently created except the final key
//! of an `add`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structural delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl DiffOp {
    pub fn path(&self) -> &str {
        match self {
            DiffOp::Add { path, .. } | DiffOp::Replace { path, .. } | DiffOp::Remove { path } => path,
        }
    }
}

/// Errors from applying a diff-op
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("Invalid path '{0}': must be empty or start with '/'")]
    InvalidPath(String),
    #[error("Path not found: {0}")]
    PathNotFound(String),
    #[error("Array index '{index}' invalid at {path}")]
    BadIndex { path: String, index: String },
    #[error("Cannot descend into scalar at {0}")]
    NotAContainer(String),
    #[error("Cannot remove the document root")]
    RootRemoval,
}

/// Fold `ops` left-to-right over `base`
pub fn apply_all(mut base: Value, ops: &[DiffOp]) -> Result<Value, PatchError> {
    for op in ops {
        apply(&mut base, op)?;
    }
    Ok(base)
}

/// Apply a single op in place
pub fn apply(doc: &mut Value, op: &DiffOp) -> Result<(), PatchError> {
    let path = op.path();
    let Some((parent_path, last)) = split_path(path)? else {
        // Root target
        return match op {
            DiffOp::Add { value, .. } | DiffOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            DiffOp::Remove { .. } => Err(PatchError::RootRemoval),
        };
    };

    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| PatchError::PathNotFound(parent_path.to_string()))?;

    match parent {
        Value::Object(map) => match op {
            DiffOp::Add { value, .. } => {
                map.insert(last, value.clone());
                Ok(())
            }
            DiffOp::Replace { value, .. } => match map.get_mut(&last) {
                Some(slot) => {
                    *slot = value.clone();
                    Ok(())
                }
                None => Err(PatchError::PathNotFound(path.to_string())),
            },
            DiffOp::Remove { .. } => map
                .remove(&last)
                .map(|_| ())
                .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
        },
        Value::Array(items) => {
            let len = items.len();
            match op {
                DiffOp::Add { value, .. } => {
                    let index = if last == "-" {
                        len
                    } else {
                        parse_index(parent_path, &last, len + 1)?
                    };
                    items.insert(index, value.clone());
                    Ok(())
                }
                DiffOp::Replace { value, .. } => {
                    let index = parse_index(parent_path, &last, len)?;
                    items[index] = value.clone();
                    Ok(())
                }
                DiffOp::Remove { .. } => {
                    let index = parse_index(parent_path, &last, len)?;
                    items.remove(index);
                    Ok(())
                }
            }
        }
        _ => Err(PatchError::NotAContainer(parent_path.to_string())),
    }
}

/// Split a pointer into its (still escaped) parent pointer and unescaped
/// final token. `None` addresses the root.
fn split_path(path: &str) -> Result<Option<(&str, String)>, PatchError> {
    if path.is_empty() {
        return Ok(None);
    }
    if !path.starts_with('/') {
        return Err(PatchError::InvalidPath(path.to_string()));
    }
    // starts_with('/') guarantees a separator
    let split = path.rfind('/').unwrap_or(0);
    let token = path[split + 1..].replace("~1", "/").replace("~0", "~");
    Ok(Some((&path[..split], token)))
}

/// Parse an array index token; valid indices are `0..bound`
fn parse_index(parent: &str, token: &str, bound: usize) -> Result<usize, PatchError> {
    let bad = || PatchError::BadIndex {
        path: parent.to_string(),
        index: token.to_string(),
    };
    // Leading zeros and signs are not indices
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return Err(bad());
    }
    let index: usize = token.parse().map_err(|_| bad())?;
    if index < bound {
        Ok(index)
    } else {
        Err(bad())
    }
}
