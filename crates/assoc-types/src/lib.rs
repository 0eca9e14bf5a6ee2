//! Foundation types for the associative blob store.
//!
//! Every other crate in the workspace depends on `assoc-types`. The types
//! here mirror the integer encodings persisted in the relational backing
//! store, so their discriminants are part of the on-disk format.
//!
//! # Key Types
//!
//! - [`SessionId`] -- identifier of a unit of work between start and commit/rollback
//! - [`Relation`] -- the kind of row a journal entry or handle refers to
//! - [`Operation`] -- the pending mutation recorded in the journal
//! - [`SessionState`] -- the commit progress marker stored on the session row

pub mod error;
pub mod ids;
pub mod relation;

pub use error::TypeError;
pub use ids::{SessionId, BLOB_TYPE_ID, BLOB_TYPE_NAME, SYSTEM_PREFIX_ID, SYSTEM_PREFIX_NAME, SYSTEM_PREFIX_URI};
pub use relation::{Operation, Relation, SessionState};
