//! Commit isolation predicates for the associative blob store.
//!
//! An isolation level decides, at commit time, whether other sessions'
//! activity could interfere with the committing session's journal. Levels
//! are read-only conflict queries over the journal, handle and session
//! tables and are selected by name from an [`IsolationRegistry`].
//!
//! # Built-in levels (weakest first)
//!
//! | name             | refuses the commit when another session ...                          |
//! |------------------|----------------------------------------------------------------------|
//! | `unsafe`         | never                                                                |
//! | `blob-exclusive` | holds a blob this session changed, directly or through metadata     |
//! | `file-exclusive` | holds any changed object or a file containing a changed blob        |
//! | `almost-full`    | holds any handle at all                                              |
//! | `full`           | exists                                                               |

pub mod error;
pub mod level;
pub mod levels;
pub mod registry;

#[cfg(test)]
mod fixture;

pub use error::{IsolationError, IsolationResult};
pub use level::{Conflict, IsolationLevel};
pub use levels::{AlmostFull, BlobExclusive, FileExclusive, Full, Unsafe};
pub use registry::{IsolationRegistry, STRENGTH_ORDER};
