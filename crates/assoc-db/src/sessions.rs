//! Rows of the `session` table.
//!
//! The `ready` column stores the [`SessionState`] discriminant so that a
//! crashed commit can be told apart from an abandoned session.

use assoc_types::{SessionId, SessionState};

use crate::error::DbResult;
use crate::sql_params;
use crate::traits::Connection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub id: SessionId,
    pub state: SessionState,
    pub pid: u32,
}

/// Allocate a session id and insert its row in state `Open`.
pub fn create(conn: &dyn Connection, pid: u32) -> DbResult<SessionId> {
    let tx = conn.transaction()?;
    let id = SessionId::new(conn.next_id("session")?);
    conn.statement(
        "insert into session (id, ready, pid) values (?1, ?2, ?3)",
        &sql_params![id, SessionState::Open.as_i64(), pid],
    )?;
    tx.commit()?;
    Ok(id)
}

pub fn set_state(conn: &dyn Connection, id: SessionId, state: SessionState) -> DbResult<()> {
    conn.statement(
        "update session set ready = ?1 where id = ?2",
        &sql_params![state.as_i64(), id],
    )?;
    Ok(())
}

pub fn get(conn: &dyn Connection, id: SessionId) -> DbResult<Option<SessionRow>> {
    let rows = conn.query(
        "select id, ready, pid from session where id = ?1",
        &sql_params![id],
    )?;
    rows.first().map(decode).transpose()
}

pub fn list(conn: &dyn Connection) -> DbResult<Vec<SessionRow>> {
    let rows = conn.execute_query("select id, ready, pid from session order by id")?;
    rows.iter().map(decode).collect()
}

pub fn delete(conn: &dyn Connection, id: SessionId) -> DbResult<()> {
    conn.statement("delete from session where id = ?1", &sql_params![id])?;
    Ok(())
}

fn decode(row: &crate::value::Row) -> DbResult<SessionRow> {
    let pid = row.get_u64(2)?;
    Ok(SessionRow {
        id: SessionId::new(row.get_u64(0)?),
        state: SessionState::from_i64(row.get_i64(1)?)?,
        pid: u32::try_from(pid).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConnection;

    #[test]
    fn lifecycle() {
        let conn: Box<dyn Connection> = Box::new(SqliteConnection::open_in_memory().unwrap());
        let a = create(conn.as_ref(), 11).unwrap();
        let b = create(conn.as_ref(), 12).unwrap();
        assert_ne!(a, b);

        let row = get(conn.as_ref(), a).unwrap().unwrap();
        assert_eq!(row.state, SessionState::Open);
        assert_eq!(row.pid, 11);

        set_state(conn.as_ref(), a, SessionState::Validated).unwrap();
        assert_eq!(
            get(conn.as_ref(), a).unwrap().unwrap().state,
            SessionState::Validated
        );

        delete(conn.as_ref(), a).unwrap();
        assert!(get(conn.as_ref(), a).unwrap().is_none());
        let all = list(conn.as_ref()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, b);
    }
}
