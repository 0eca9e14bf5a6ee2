//! Table layout of the backing store.

use assoc_types::{
    BLOB_TYPE_ID, BLOB_TYPE_NAME, SYSTEM_PREFIX_ID, SYSTEM_PREFIX_NAME, SYSTEM_PREFIX_URI,
};
use tracing::debug;

use crate::error::DbResult;
use crate::sql_params;
use crate::traits::Connection;

const TABLES: &str = "
create table if not exists ids (
    table_name text primary key,
    next_id integer not null
);
create table if not exists session (
    id integer primary key,
    ready integer not null default 0,
    pid integer not null
);
create table if not exists file (
    id integer primary key,
    uuid text not null unique,
    visible integer not null default 0,
    reserved integer not null default 0
);
create table if not exists content_type (
    id integer primary key,
    mime text not null unique
);
create table if not exists blob (
    id integer primary key,
    file_id integer not null,
    name text not null,
    content_type_id integer not null,
    visible integer not null default 0
);
create index if not exists blob_file on blob (file_id, name);
create table if not exists prefix (
    id integer primary key,
    name text not null unique,
    uri text not null
);
create table if not exists type (
    id integer primary key,
    prefix_id integer not null,
    name text not null,
    unique (prefix_id, name)
);
create table if not exists metadata (
    id integer primary key,
    blob_id integer not null,
    predicate_prefix_id integer not null,
    predicate text not null,
    object_type_id integer not null,
    object text not null,
    visible integer not null default 0
);
create index if not exists metadata_blob on metadata (blob_id);
create table if not exists journal (
    id integer primary key,
    session_id integer not null,
    relation integer not null,
    relation_id integer not null,
    operation integer not null,
    target text,
    executed integer not null default 0
);
create index if not exists journal_session on journal (session_id);
create table if not exists handle (
    id integer primary key,
    relation integer not null,
    relation_id integer not null,
    session_id integer not null
);
create index if not exists handle_object on handle (relation, relation_id);
";

/// Tables a data source dump or inspection may name.
pub const TABLE_NAMES: &[&str] = &[
    "ids",
    "session",
    "file",
    "content_type",
    "blob",
    "prefix",
    "type",
    "metadata",
    "journal",
    "handle",
];

/// Create missing tables and seed the system prefix and blob type.
///
/// Idempotent; safe to run on every open.
pub fn install(conn: &dyn Connection) -> DbResult<()> {
    let tx = conn.transaction()?;
    conn.execute_statement(TABLES)?;
    conn.statement(
        "insert or ignore into prefix (id, name, uri) values (?1, ?2, ?3)",
        &sql_params![SYSTEM_PREFIX_ID, SYSTEM_PREFIX_NAME, SYSTEM_PREFIX_URI],
    )?;
    conn.statement(
        "insert or ignore into type (id, prefix_id, name) values (?1, ?2, ?3)",
        &sql_params![BLOB_TYPE_ID, SYSTEM_PREFIX_ID, BLOB_TYPE_NAME],
    )?;
    for counter in ["prefix", "type"] {
        conn.statement(
            "insert or ignore into ids (table_name, next_id) values (?1, 1)",
            &sql_params![counter],
        )?;
    }
    tx.commit()?;
    debug!(provider = conn.provider(), "schema installed");
    Ok(())
}
