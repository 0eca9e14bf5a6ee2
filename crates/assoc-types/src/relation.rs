use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The kind of row a journal entry or handle refers to.
///
/// Discriminants are persisted in the `journal.relation` and
/// `handle.relation` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    File = 0,
    Blob = 1,
    Metadata = 2,
}

impl Relation {
    pub const ALL: [Relation; 3] = [Relation::File, Relation::Blob, Relation::Metadata];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self, TypeError> {
        match value {
            0 => Ok(Self::File),
            1 => Ok(Self::Blob),
            2 => Ok(Self::Metadata),
            _ => Err(TypeError::UnknownDiscriminant {
                kind: "relation",
                value,
            }),
        }
    }

    /// Name of the table holding rows of this relation.
    pub fn table(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Blob => "blob",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A pending mutation recorded in the journal.
///
/// `Store` only applies to blobs: it carries the staged temp path of new
/// content in `journal.target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add = 0,
    Remove = 1,
    Store = 2,
}

impl Operation {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self, TypeError> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Remove),
            2 => Ok(Self::Store),
            _ => Err(TypeError::UnknownDiscriminant {
                kind: "operation",
                value,
            }),
        }
    }

    /// Whether replaying this operation touches the blob tree on disk.
    pub fn touches_filesystem(self) -> bool {
        matches!(self, Self::Remove | Self::Store)
    }
}

/// Commit progress of a session, persisted in `session.ready`.
///
/// `Validated` is the durable recovery point: once a session row carries
/// it, the isolation check has passed and a crashed commit must be rolled
/// forward rather than back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Open = 0,
    Ready = 1,
    Validated = 2,
}

impl SessionState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self, TypeError> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::Ready),
            2 => Ok(Self::Validated),
            _ => Err(TypeError::UnknownDiscriminant {
                kind: "session state",
                value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_discriminants_are_stable() {
        assert_eq!(Relation::File.as_i64(), 0);
        assert_eq!(Relation::Blob.as_i64(), 1);
        assert_eq!(Relation::Metadata.as_i64(), 2);
        for relation in Relation::ALL {
            assert_eq!(Relation::from_i64(relation.as_i64()).unwrap(), relation);
        }
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let err = Relation::from_i64(7).unwrap_err();
        assert_eq!(
            err,
            TypeError::UnknownDiscriminant {
                kind: "relation",
                value: 7
            }
        );
    }

    #[test]
    fn operation_filesystem_classification() {
        assert!(!Operation::Add.touches_filesystem());
        assert!(Operation::Remove.touches_filesystem());
        assert!(Operation::Store.touches_filesystem());
        assert!(Operation::from_i64(3).is_err());
    }

    #[test]
    fn session_state_defaults_to_open() {
        assert_eq!(SessionState::default(), SessionState::Open);
        assert_eq!(SessionState::from_i64(2).unwrap(), SessionState::Validated);
    }

    #[test]
    fn relation_displays_table_name() {
        assert_eq!(Relation::Metadata.to_string(), "metadata");
    }
}
