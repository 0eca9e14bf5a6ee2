//! Session-wide operations on the handle registry.
//!
//! A handle row records that a session holds an in-memory reference to a
//! file, blob or metadata row. Isolation checks read these rows; individual
//! handles are opened and closed through [`Connection::open_handle`] and
//! [`Connection::close_handle`].

use assoc_types::SessionId;
use tracing::debug;

use crate::error::DbResult;
use crate::sql_params;
use crate::traits::Connection;

/// Close every handle held by `session`. Returns the number removed.
pub fn close_session_handles(conn: &dyn Connection, session: SessionId) -> DbResult<usize> {
    conn.statement(
        "delete from handle where session_id = ?1",
        &sql_params![session],
    )
}

/// Remove handles whose session row no longer exists.
pub fn purge_orphan_handles(conn: &dyn Connection) -> DbResult<usize> {
    let removed = conn.statement(
        "delete from handle where session_id not in (select id from session)",
        &[],
    )?;
    if removed > 0 {
        debug!(removed, "purged orphan handles");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConnection;
    use assoc_types::Relation;

    fn memory() -> Box<dyn Connection> {
        Box::new(SqliteConnection::open_in_memory().unwrap())
    }

    /// Sessions holding a handle on one object, in handle order.
    fn holders(conn: &dyn Connection, relation: Relation, relation_id: u64) -> Vec<SessionId> {
        conn.query(
            "select session_id from handle where relation = ?1 and relation_id = ?2 order by id",
            &sql_params![relation, relation_id],
        )
        .unwrap()
        .iter()
        .map(|row| SessionId::new(row.get_u64(0).unwrap()))
        .collect()
    }

    #[test]
    fn lists_handles_per_object() {
        let conn = memory();
        let a = SessionId::new(1);
        let b = SessionId::new(2);
        conn.open_handle(Relation::Blob, 5, a).unwrap();
        conn.open_handle(Relation::Blob, 5, b).unwrap();
        conn.open_handle(Relation::File, 5, a).unwrap();

        assert_eq!(holders(conn.as_ref(), Relation::Blob, 5), vec![a, b]);
        assert_eq!(holders(conn.as_ref(), Relation::File, 5), vec![a]);
    }

    #[test]
    fn closes_all_handles_of_a_session() {
        let conn = memory();
        let a = SessionId::new(1);
        let b = SessionId::new(2);
        conn.open_handle(Relation::Blob, 5, a).unwrap();
        conn.open_handle(Relation::File, 6, a).unwrap();
        conn.open_handle(Relation::Blob, 5, b).unwrap();

        assert_eq!(close_session_handles(conn.as_ref(), a).unwrap(), 2);
        assert_eq!(holders(conn.as_ref(), Relation::Blob, 5), vec![b]);
    }

    #[test]
    fn purges_handles_of_vanished_sessions() {
        let conn = memory();
        conn.statement("insert into session (id, ready, pid) values (1, 0, 100)", &[])
            .unwrap();
        conn.open_handle(Relation::Blob, 5, SessionId::new(1)).unwrap();
        conn.open_handle(Relation::Blob, 5, SessionId::new(2)).unwrap();

        assert_eq!(purge_orphan_handles(conn.as_ref()).unwrap(), 1);
        assert_eq!(holders(conn.as_ref(), Relation::Blob, 5), vec![SessionId::new(1)]);
    }
}
