use assoc_types::{Relation, SessionId};
use tracing::warn;

use crate::error::DbResult;
use crate::sql_params;
use crate::value::{QueryResult, SqlValue};

/// A session with the relational backing store.
///
/// Implementations must satisfy these invariants:
/// - `begin`/`commit`/`rollback` nest. Only the outermost level is a real
///   database transaction; inner levels are savepoints that can be undone
///   without affecting the enclosing level.
/// - Prepared statements are cached per SQL text.
/// - Errors carry the offending statement text.
pub trait Connection: Send {
    /// Name of the provider that produced this connection.
    fn provider(&self) -> &str;

    /// Run raw SQL, possibly several `;`-separated statements.
    fn execute_statement(&self, sql: &str) -> DbResult<()>;

    /// Run a parameterized statement and return the number of changed rows.
    fn statement(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;

    /// Run a parameterized query and materialize every row.
    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<QueryResult>;

    /// Run a query without parameters.
    fn execute_query(&self, sql: &str) -> DbResult<QueryResult> {
        self.query(sql, &[])
    }

    fn begin(&self) -> DbResult<()>;
    fn commit(&self) -> DbResult<()>;
    fn rollback(&self) -> DbResult<()>;

    /// Current nesting depth; zero outside any transaction.
    fn transaction_depth(&self) -> u32;
}

impl dyn Connection + '_ {
    /// Begin a (possibly nested) transaction that rolls back unless committed.
    pub fn transaction(&self) -> DbResult<TransactionGuard<'_>> {
        self.begin()?;
        Ok(TransactionGuard {
            conn: self,
            active: true,
        })
    }

    /// Take the next value of the named counter.
    ///
    /// A counter seen for the first time yields 0 and is initialized to 1.
    pub fn next_id(&self, counter: &str) -> DbResult<u64> {
        let tx = self.transaction()?;
        let current = self.query(
            "select next_id from ids where table_name = ?1",
            &sql_params![counter],
        )?;
        let id = match current.first() {
            Some(row) => {
                let id = row.get_u64(0)?;
                self.statement(
                    "update ids set next_id = next_id + 1 where table_name = ?1",
                    &sql_params![counter],
                )?;
                id
            }
            None => {
                self.statement(
                    "insert into ids (table_name, next_id) values (?1, 1)",
                    &sql_params![counter],
                )?;
                0
            }
        };
        tx.commit()?;
        Ok(id)
    }

    /// Register that `session` holds a reference to the given object.
    pub fn open_handle(
        &self,
        relation: Relation,
        relation_id: u64,
        session: SessionId,
    ) -> DbResult<u64> {
        let tx = self.transaction()?;
        let id = self.next_id("handle")?;
        self.statement(
            "insert into handle (id, relation, relation_id, session_id) values (?1, ?2, ?3, ?4)",
            &sql_params![id, relation, relation_id, session],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn close_handle(&self, handle: u64) -> DbResult<()> {
        self.statement("delete from handle where id = ?1", &sql_params![handle])?;
        Ok(())
    }
}

/// Scoped transaction. Dropping an uncommitted guard rolls back.
#[must_use = "an uncommitted transaction rolls back when dropped"]
pub struct TransactionGuard<'a> {
    conn: &'a dyn Connection,
    active: bool,
}

impl TransactionGuard<'_> {
    pub fn commit(mut self) -> DbResult<()> {
        self.finish(true)
    }

    pub fn rollback(mut self) -> DbResult<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> DbResult<()> {
        self.active = false;
        if commit {
            self.conn.commit()
        } else {
            self.conn.rollback()
        }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            if let Err(e) = self.conn.rollback() {
                warn!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}
