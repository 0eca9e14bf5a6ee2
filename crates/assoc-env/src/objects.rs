//! Value types of the object model.

use std::fmt;

use assoc_types::{SessionId, BLOB_TYPE_ID};
use serde::Serialize;

/// Session-scoped key of a cached file.
///
/// Only valid until the session that produced it commits or rolls back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub(crate) session: SessionId,
    pub(crate) index: usize,
}

/// Session-scoped key of a cached blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub(crate) session: SessionId,
    pub(crate) index: usize,
}

/// A predicate namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Prefix {
    pub id: u64,
    pub name: String,
    pub uri: String,
}

/// The type of a triple's object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectType {
    pub id: u64,
    pub prefix: Prefix,
    pub name: String,
}

impl ObjectType {
    /// Whether objects of this type are blob ids.
    pub fn is_blob(&self) -> bool {
        self.id == BLOB_TYPE_ID
    }
}

/// The blob a triple describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub blob_id: u64,
    pub file_uuid: String,
    pub blob_name: String,
}

/// A metadata statement `(subject, predicate, object)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Triple {
    pub id: u64,
    pub subject: Subject,
    pub predicate_prefix: Prefix,
    pub predicate: String,
    pub object_type: ObjectType,
    pub object: String,
}

impl Triple {
    /// The referenced blob id when the object is a blob.
    pub fn object_blob(&self) -> Option<u64> {
        if self.object_type.is_blob() {
            self.object.parse().ok()
        } else {
            None
        }
    }

    /// `(uuid:blob,prefix:predicate,object)`
    pub fn display_simple(&self) -> String {
        format!(
            "({}:{},{}:{},{})",
            self.subject.file_uuid,
            self.subject.blob_name,
            self.predicate_prefix.name,
            self.predicate,
            self.object
        )
    }

    /// `(uuid:blob,<uri predicate>,object :: <uri type>)`
    pub fn display_verbose(&self) -> String {
        format!(
            "({}:{},<{}{}>,{} :: <{}{}>)",
            self.subject.file_uuid,
            self.subject.blob_name,
            self.predicate_prefix.uri,
            self.predicate,
            self.object,
            self.object_type.prefix.uri,
            self.object_type.name
        )
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_simple())
    }
}
