//! Journal-driven steps shared by commit, rollback and recovery.

use std::fs;

use assoc_db::{handles, journal, sessions, sql_params, Connection, PendingVfsEntry};
use assoc_types::{Operation, Relation, SessionId, BLOB_TYPE_ID};
use assoc_vfs::{Transaction, Vfs};
use tracing::{debug, warn};

use crate::error::{EnvError, EnvResult};

/// Journal entries of the session undone by a removal that committed first:
/// - blobs the session added or stored whose blob or file row is gone;
/// - added metadata whose subject or blob-typed object lost its blob or file;
/// - file removals that would strand a blob another session added since.
const INVALIDATED: &str = "
select j.id from journal j
where j.session_id = ?1 and j.relation = ?2 and j.operation in (?3, ?4)
  and not exists (select 1 from blob b join file f on f.id = b.file_id
                  where b.id = j.relation_id)
union
select j.id from journal j
join metadata m on m.id = j.relation_id
where j.session_id = ?1 and j.relation = ?5 and j.operation = ?4
  and (not exists (select 1 from blob b join file f on f.id = b.file_id
                   where b.id = m.blob_id)
       or (m.object_type_id = ?6
           and not exists (select 1 from blob b join file f on f.id = b.file_id
                           where b.id = cast(m.object as integer))))
union
select j.id from journal j
where j.session_id = ?1 and j.relation = ?7 and j.operation = ?8
  and exists (select 1 from blob b
              where b.file_id = j.relation_id and b.visible = 1
                and b.id not in (select relation_id from journal
                                 where session_id = ?1 and relation = ?2
                                   and operation = ?8))
limit 1
";

/// Whether work of `session` was undone by a removal that committed first.
pub(crate) fn is_invalidated(conn: &dyn Connection, session: SessionId) -> EnvResult<bool> {
    let hit = conn.query(
        INVALIDATED,
        &sql_params![
            session,
            Relation::Blob,
            Operation::Store,
            Operation::Add,
            Relation::Metadata,
            BLOB_TYPE_ID,
            Relation::File,
            Operation::Remove
        ],
    )?;
    Ok(!hit.is_empty())
}

/// Apply pending `Store`/`Remove` entries to the blob tree, marking each as
/// executed. With `resume` set, stores whose staged file is gone are taken
/// as already applied.
pub(crate) fn replay_vfs<'v>(
    conn: &dyn Connection,
    vfs: &'v Vfs,
    session: SessionId,
    resume: bool,
) -> EnvResult<Transaction<'v>> {
    let pending = journal::pending_vfs_entries(conn, session)?;
    let mut tx = vfs.begin(session);
    for entry in &pending {
        apply_entry(vfs, &mut tx, entry, resume)?;
        journal::mark_executed(conn, entry.entry_id)?;
    }
    debug!(session = %session, steps = pending.len(), "replayed filesystem journal");
    Ok(tx)
}

fn apply_entry(
    vfs: &Vfs,
    tx: &mut Transaction<'_>,
    entry: &PendingVfsEntry,
    resume: bool,
) -> EnvResult<()> {
    let Some((uuid, name)) = &entry.location else {
        if entry.operation == Operation::Store {
            return Err(EnvError::LostStore {
                entry: entry.entry_id,
                blob: entry.blob_id,
            });
        }
        debug!(entry = entry.entry_id, blob = entry.blob_id, "removed blob already gone");
        return Ok(());
    };
    let dest = vfs.content_path(uuid, name);
    match entry.operation {
        Operation::Store => {
            let Some(target) = entry.target.as_deref() else {
                warn!(entry = entry.entry_id, "store entry without staged file");
                return Ok(());
            };
            let src = vfs.temp_path(target);
            if resume && !src.exists() {
                debug!(entry = entry.entry_id, "store already applied");
                return Ok(());
            }
            tx.move_into(&src, &dest)?;
        }
        Operation::Remove => tx.remove(&dest)?,
        Operation::Add => {}
    }
    Ok(())
}

fn journaled(table: &str, set: &str) -> String {
    format!(
        "{set} where id in (select relation_id from journal \
         where session_id = ?1 and relation = ?2 and operation = ?3)",
        set = set.replace("{table}", table)
    )
}

fn apply_journaled(
    conn: &dyn Connection,
    session: SessionId,
    relation: Relation,
    operation: Operation,
    statement: &str,
) -> EnvResult<usize> {
    let sql = journaled(relation.table(), statement);
    Ok(conn.statement(&sql, &sql_params![session, relation, operation])?)
}

/// Make the session's row changes visible and end the session in one
/// database transaction.
pub(crate) fn publish_rows(conn: &dyn Connection, session: SessionId) -> EnvResult<()> {
    let tx = conn.transaction()?;
    for relation in Relation::ALL {
        apply_journaled(
            conn,
            session,
            relation,
            Operation::Add,
            "update {table} set visible = 1",
        )?;
    }

    // Visible metadata about removed blobs goes with them.
    let cascaded = conn.statement(
        "delete from metadata where visible = 1 and (
             blob_id in (select relation_id from journal
                         where session_id = ?1 and relation = ?2 and operation = ?3)
             or (object_type_id = ?4 and cast(object as integer) in
                 (select relation_id from journal
                  where session_id = ?1 and relation = ?2 and operation = ?3)))",
        &sql_params![session, Relation::Blob, Operation::Remove, BLOB_TYPE_ID],
    )?;
    if cascaded > 0 {
        debug!(session = %session, cascaded, "removed metadata of removed blobs");
    }

    for relation in [Relation::Metadata, Relation::Blob, Relation::File] {
        apply_journaled(
            conn,
            session,
            relation,
            Operation::Remove,
            "delete from {table}",
        )?;
    }
    finish_session_rows(conn, session)?;
    tx.commit()?;
    Ok(())
}

/// Delete the rows the session created and end the session in one database
/// transaction. Rows that existed before the session are left alone.
pub(crate) fn discard_rows(conn: &dyn Connection, session: SessionId) -> EnvResult<()> {
    let tx = conn.transaction()?;
    for relation in Relation::ALL {
        apply_journaled(
            conn,
            session,
            relation,
            Operation::Add,
            "delete from {table}",
        )?;
    }
    finish_session_rows(conn, session)?;
    tx.commit()?;
    Ok(())
}

fn finish_session_rows(conn: &dyn Connection, session: SessionId) -> EnvResult<()> {
    handles::close_session_handles(conn, session)?;
    journal::flush(conn, session)?;
    sessions::delete(conn, session)?;
    Ok(())
}

/// Uuids of files the session removed, for pruning their directories.
pub(crate) fn removed_files(conn: &dyn Connection, session: SessionId) -> EnvResult<Vec<String>> {
    let rows = conn.query(
        "select file.uuid from journal join file on file.id = journal.relation_id \
         where journal.session_id = ?1 and journal.relation = ?2 and journal.operation = ?3",
        &sql_params![session, Relation::File, Operation::Remove],
    )?;
    rows.iter()
        .map(|row| -> EnvResult<String> { Ok(row.get_str(0)?.to_string()) })
        .collect()
}

/// Remove now-empty blob directories. Best effort.
pub(crate) fn prune_dirs(vfs: &Vfs, uuids: &[String]) {
    for uuid in uuids {
        let dir = vfs.blobs_dir().join(uuid);
        if let Err(e) = fs::remove_dir(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %e, "kept blob directory");
            }
        }
    }
}

/// Delete staged temp files and backups of a session. Best effort.
pub(crate) fn discard_staged(vfs: &Vfs, session: SessionId, targets: &[String]) -> usize {
    let mut removed = 0;
    for target in targets {
        match vfs.discard_temp(target) {
            Ok(()) => removed += 1,
            Err(e) => warn!(target, error = %e, "failed to delete staged file"),
        }
    }
    match vfs.discard_backups(session) {
        Ok(n) => removed += n,
        Err(e) => warn!(session = %session, error = %e, "failed to delete backups"),
    }
    removed
}
