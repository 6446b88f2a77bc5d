//! Local output root and path containment.
//!
//! Every persisted media file lives directly under one configured directory.
//! Filenames handed back by callers are opaque and are validated lexically,
//! before any filesystem access, so a traversal attempt is reported as such
//! rather than as a missing file.

use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;

/// Default output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// The directory persisted media is written to and read back from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoot {
    path: PathBuf,
}

impl OutputRoot {
    /// Build an output root, anchoring relative paths at the current
    /// working directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self {
            path: normalize_lexically(&absolute),
        })
    }

    /// Absolute path of the root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an opaque local filename to its absolute path.
    ///
    /// Rejects empty names, names containing `/` or `\` (on every platform),
    /// and anything that would not land strictly inside the root.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, CoreError> {
        if filename.trim().is_empty() {
            return Err(CoreError::Validation("Local filename is required".into()));
        }
        if filename.contains(['/', '\\']) {
            return Err(CoreError::PathTraversal(format!(
                "'{filename}' contains a path separator"
            )));
        }

        let candidate = normalize_lexically(&self.path.join(filename));
        if candidate == self.path || !candidate.starts_with(&self.path) {
            return Err(CoreError::PathTraversal(format!(
                "'{filename}' resolves outside of the output directory"
            )));
        }
        Ok(candidate)
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
