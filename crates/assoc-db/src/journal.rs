//! The per-session intent journal.
//!
//! Every mutation a session makes is recorded here before commit. Commit
//! replays filesystem entries in id order, then publishes the recorded row
//! changes; rollback reverses them. Entries are flushed when the session
//! ends.

use assoc_types::{Operation, Relation, SessionId};

use crate::error::DbResult;
use crate::sql_params;
use crate::traits::Connection;
use crate::value::Row;

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub id: u64,
    pub session: SessionId,
    pub relation: Relation,
    pub relation_id: u64,
    pub operation: Operation,
    /// Staging file name for blob `Store` entries.
    pub target: Option<String>,
    pub executed: bool,
}

impl JournalEntry {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.get_u64(0)?,
            session: SessionId::new(row.get_u64(1)?),
            relation: Relation::from_i64(row.get_i64(2)?)?,
            relation_id: row.get_u64(3)?,
            operation: Operation::from_i64(row.get_i64(4)?)?,
            target: row.get_opt_str(5)?.map(String::from),
            executed: row.get_bool(6)?,
        })
    }
}

/// A filesystem step still to be replayed, with the names needed to
/// locate the durable content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVfsEntry {
    pub entry_id: u64,
    pub blob_id: u64,
    pub operation: Operation,
    pub target: Option<String>,
    /// `(file uuid, blob name)`; `None` once the blob or its file row is gone.
    pub location: Option<(String, String)>,
}

/// Append an entry and return its id.
pub fn record(
    conn: &dyn Connection,
    session: SessionId,
    relation: Relation,
    relation_id: u64,
    operation: Operation,
    target: Option<&str>,
) -> DbResult<u64> {
    let id = conn.next_id("journal")?;
    conn.statement(
        "insert into journal (id, session_id, relation, relation_id, operation, target, executed) \
         values (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        &sql_params![id, session, relation, relation_id, operation, target],
    )?;
    Ok(id)
}

/// All entries of a session in recording order.
pub fn entries_for(conn: &dyn Connection, session: SessionId) -> DbResult<Vec<JournalEntry>> {
    let rows = conn.query(
        "select id, session_id, relation, relation_id, operation, target, executed \
         from journal where session_id = ?1 order by id",
        &sql_params![session],
    )?;
    rows.iter().map(JournalEntry::from_row).collect()
}

/// Blob `Store`/`Remove` entries not yet applied to the filesystem.
///
/// Entries whose blob or file row has vanished are returned without a
/// location; the caller decides whether that is fatal.
pub fn pending_vfs_entries(
    conn: &dyn Connection,
    session: SessionId,
) -> DbResult<Vec<PendingVfsEntry>> {
    let rows = conn.query(
        "select journal.id, journal.relation_id, journal.operation, journal.target, \
                file.uuid, blob.name \
         from journal \
         left join blob on blob.id = journal.relation_id \
         left join file on file.id = blob.file_id \
         where journal.session_id = ?1 and journal.relation = ?2 \
           and journal.operation in (?3, ?4) and journal.executed = 0 \
         order by journal.id",
        &sql_params![session, Relation::Blob, Operation::Store, Operation::Remove],
    )?;
    rows.iter()
        .map(|row| -> DbResult<PendingVfsEntry> {
            let location = match (row.get_opt_str(4)?, row.get_opt_str(5)?) {
                (Some(uuid), Some(name)) => Some((uuid.to_string(), name.to_string())),
                _ => None,
            };
            Ok(PendingVfsEntry {
                entry_id: row.get_u64(0)?,
                blob_id: row.get_u64(1)?,
                operation: Operation::from_i64(row.get_i64(2)?)?,
                target: row.get_opt_str(3)?.map(String::from),
                location,
            })
        })
        .collect()
}

pub fn mark_executed(conn: &dyn Connection, entry_id: u64) -> DbResult<()> {
    conn.statement(
        "update journal set executed = 1 where id = ?1",
        &sql_params![entry_id],
    )?;
    Ok(())
}

/// Clear the executed flag of every entry of a session, after the
/// filesystem steps were undone.
pub fn reset_executed(conn: &dyn Connection, session: SessionId) -> DbResult<usize> {
    conn.statement(
        "update journal set executed = 0 where session_id = ?1",
        &sql_params![session],
    )
}

/// Staging names of unexecuted `Store` entries, for cleanup after abort.
pub fn staged_targets(conn: &dyn Connection, session: SessionId) -> DbResult<Vec<String>> {
    let rows = conn.query(
        "select target from journal \
         where session_id = ?1 and operation = ?2 and executed = 0 and target is not null \
         order by id",
        &sql_params![session, Operation::Store],
    )?;
    rows.iter()
        .map(|row| row.get_str(0).map(String::from))
        .collect()
}

/// Delete every entry of a session. Returns the number removed.
pub fn flush(conn: &dyn Connection, session: SessionId) -> DbResult<usize> {
    conn.statement(
        "delete from journal where session_id = ?1",
        &sql_params![session],
    )
}
