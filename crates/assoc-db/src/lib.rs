//! Relational backing store for the associative blob store.
//!
//! Every piece of structured state lives in a single relational database:
//! files, blobs, metadata triples, prefixes and types, plus the
//! coordination tables (sessions, the intent journal and the handle
//! registry) that make concurrent sessions safe.
//!
//! # Connections
//!
//! All backends implement the [`Connection`] trait and are created from a
//! data source string through a [`ProviderRegistry`]:
//!
//! - `sqlite3:<path>` -- a SQLite file in WAL mode, shareable between processes
//! - `memory:` -- a private in-memory SQLite database for tests
//!
//! # Rules
//!
//! 1. Transactions nest; inner levels are savepoints.
//! 2. A [`TransactionGuard`] that is dropped without commit rolls back.
//! 3. Ids come from per-table counters ([`Connection::next_id`]) and are never reused.

pub mod error;
pub mod handles;
pub mod journal;
pub mod provider;
pub mod schema;
pub mod sessions;
pub mod sqlite;
pub mod traits;
pub mod value;

pub use error::{DbError, DbResult};
pub use journal::{JournalEntry, PendingVfsEntry};
pub use provider::{ProviderFn, ProviderRegistry};
pub use sessions::SessionRow;
pub use sqlite::SqliteConnection;
pub use traits::{Connection, TransactionGuard};
pub use value::{QueryResult, Row, SqlValue};
