//! Path confinement for user-supplied paths.
//!
//! Every path that reaches the job manager or scanner from the outside goes
//! through [`confine`] first. Downstream components assume their inputs have
//! already been validated.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Error type for path validation
#[derive(Debug, Error)]
pub enum PathError {
    /// Empty path supplied
    #[error("path is empty")]
    Empty,

    /// Path escapes every allowed root
    #[error("access denied: path {0} is outside allowed directories")]
    OutsideRoots(String),
}

/// Resolve a candidate path and verify it lies within one of the allowed roots.
///
/// Normalizes `.` and `..` segments lexically. Relative paths are interpreted
/// relative to the first root. Paths that exist on disk are canonicalized so
/// symlinks pointing outside the roots are rejected. Returns the resolved
/// absolute path on success.
pub fn confine(path: &Path, roots: &[&Path]) -> Result<PathBuf, PathError> {
    if path.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    let candidate = if path.is_absolute() {
        normalize(path)
    } else {
        let first = roots
            .iter()
            .find(|r| !r.as_os_str().is_empty())
            .ok_or_else(|| PathError::OutsideRoots(path.display().to_string()))?;
        normalize(&first.join(path))
    };

    // Resolve symlinks when the target already exists; a freshly created
    // destination path cannot be canonicalized yet and keeps its lexical form.
    let resolved = candidate.canonicalize().unwrap_or(candidate);

    for root in roots {
        if root.as_os_str().is_empty() {
            continue;
        }
        let root = normalize(root);
        let root = root.canonicalize().unwrap_or(root);
        if resolved.starts_with(&root) {
            return Ok(resolved);
        }
    }

    Err(PathError::OutsideRoots(path.display().to_string()))
}

/// Lexically normalize a path, resolving `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
