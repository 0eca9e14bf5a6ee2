use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors from the filesystem layer.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A lock was not acquired within the configured wait.
    #[error("timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Every candidate temp name for the seed is taken.
    #[error("temp name space exhausted for seed '{seed}'")]
    Allocation { seed: String },

    /// A blob or temp name that would escape its directory.
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

impl VfsError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> VfsError + '_ {
        move |source| VfsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result alias for filesystem operations.
pub type VfsResult<T> = Result<T, VfsError>;
