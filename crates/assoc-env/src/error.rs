use std::fmt;
use std::path::PathBuf;

use assoc_db::DbError;
use assoc_isolation::{Conflict, IsolationError};
use assoc_types::SessionId;
use assoc_vfs::VfsError;
use serde::Serialize;

/// Why a commit attempt was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitReason {
    /// Another session removed a blob this session wrote to or described.
    Invalidated,
    /// The isolation level found interfering sessions.
    ConflictingHandles,
}

impl fmt::Display for CommitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalidated => f.write_str("invalidated"),
            Self::ConflictingHandles => f.write_str("conflicting handles"),
        }
    }
}

/// A refused commit. The session stays open with its journal intact.
#[derive(Clone, Debug, thiserror::Error)]
#[error("commit of session {session} refused under '{level}': {reason}")]
pub struct CommitError {
    pub session: SessionId,
    pub level: String,
    pub reason: CommitReason,
    pub conflicts: Vec<Conflict>,
}

/// Errors from the environment and object model.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("no session in progress")]
    NoSession,

    #[error("session {0} already in progress")]
    SessionActive(SessionId),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A file or blob reference from an earlier session.
    #[error("reference belongs to session {0}, which has ended")]
    StaleReference(SessionId),

    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Staged content of a validated session has no blob row to land in.
    #[error("journal entry {entry} stores into blob {blob}, which no longer exists")]
    LostStore { entry: u64, blob: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),
}

impl EnvError {
    /// The refusal reason if this is a refused commit.
    pub fn commit_reason(&self) -> Option<CommitReason> {
        match self {
            Self::Commit(e) => Some(e.reason),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> EnvError {
        let path = path.into();
        move |source| EnvError::Io { path, source }
    }
}

/// Result alias for environment operations.
pub type EnvResult<T> = Result<T, EnvError>;
