//! Filesystem side of the associative blob store.
//!
//! Blob content lives in a plain directory tree; the relational store is
//! the source of truth and this crate only ever changes the tree through
//! reversible steps:
//!
//! - [`Vfs`] -- layout, temp staging and name allocation
//! - [`Transaction`] -- move/remove with backups, finished or rolled back as a unit
//! - [`lock`] -- advisory locks: the temp allocation [`FileLock`], per-store
//!   [`NamedLock`]s such as the commit lock, and [`SessionLiveness`] markers

pub mod error;
pub mod lock;
pub mod transaction;
pub mod vfs;

pub use error::{VfsError, VfsResult};
pub use lock::{clear_locks, lock_dir, FileLock, LockGuard, NamedLock, SessionLiveness};
pub use transaction::Transaction;
pub use vfs::{backup_seed, validate_name, Vfs, BLOBS_DIR, TEMP_DIR};
