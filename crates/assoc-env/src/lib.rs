//! Sessions and the object model of the associative blob store.
//!
//! An [`Environment`] binds a relational backing store to a blob tree on
//! disk and runs one session at a time. Within a session, files, blobs and
//! metadata triples can be created, read, changed and removed; every change
//! is journaled and stays private to the session until it commits.
//!
//! # Commit
//!
//! 1. Take the commit lock.
//! 2. Mark the session ready and ask the chosen isolation level for conflicts.
//! 3. Refuse if another session interferes or invalidated this one's work;
//!    otherwise record the session as validated.
//! 4. Replay staged content and removals onto the blob tree.
//! 5. Flip visibility, apply removals, flush the journal, end the session.
//!
//! A crash after step 3 is rolled forward by [`Environment::recover`] on the
//! next open; a crash before it is rolled back.
//!
//! # Example
//!
//! ```no_run
//! use assoc_env::{Environment, StoreConfig};
//!
//! # fn main() -> assoc_env::EnvResult<()> {
//! let mut env = Environment::open(&StoreConfig::at("/var/lib/assoc"))?;
//! env.start_session()?;
//! let file = env.create_file()?;
//! let blob = env.add_blob(file, "default", "text/plain")?;
//! env.write_blob(blob, b"hello")?;
//! env.commit_session("full")?;
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod check;
pub mod config;
pub mod environment;
pub mod error;
pub mod objects;
mod publish;
pub mod recovery;

pub use check::CheckReport;
pub use config::StoreConfig;
pub use environment::Environment;
pub use error::{CommitError, CommitReason, EnvError, EnvResult};
pub use objects::{BlobRef, FileRef, ObjectType, Prefix, Subject, Triple};
pub use recovery::RecoveryReport;
