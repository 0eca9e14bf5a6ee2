use std::fmt;

use assoc_db::{Connection, SqlValue};
use assoc_types::{Relation, SessionId};
use tracing::debug;

use crate::error::IsolationResult;

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// Why a commit is not isolated: another session's activity that overlaps
/// with the committing session's journal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Conflict {
    /// The interfering session.
    pub other: SessionId,
    /// The object that session holds a handle on, if the conflict is
    /// about a particular object rather than the session's mere existence.
    pub object: Option<(Relation, u64)>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            Some((relation, id)) => write!(f, "session {} holds {relation} {id}", self.other),
            None => write!(f, "session {} is open", self.other),
        }
    }
}

// ---------------------------------------------------------------------------
// IsolationLevel
// ---------------------------------------------------------------------------

/// A named predicate deciding whether a session may commit.
///
/// Implementations only read journal, handle and session rows. They run
/// under the commit lock inside the commit transaction, so the state they
/// see cannot change while they evaluate.
pub trait IsolationLevel: Send + Sync {
    /// Name used to select the level.
    fn name(&self) -> &'static str;

    /// Everything that prevents `session` from committing.
    fn conflicts(&self, conn: &dyn Connection, session: SessionId)
        -> IsolationResult<Vec<Conflict>>;

    /// Whether `session` may commit.
    fn is_isolated(&self, conn: &dyn Connection, session: SessionId) -> IsolationResult<bool> {
        Ok(self.conflicts(conn, session)?.is_empty())
    }
}

/// Run a query returning `(session_id, relation, relation_id)` rows of
/// handles held by other sessions.
pub(crate) fn handle_conflicts(
    conn: &dyn Connection,
    sql: &str,
    params: &[SqlValue],
) -> IsolationResult<Vec<Conflict>> {
    let rows = conn.query(sql, params)?;
    let mut conflicts = rows
        .iter()
        .map(|row| -> IsolationResult<Conflict> {
            Ok(Conflict {
                other: SessionId::new(row.get_u64(0)?),
                object: Some((
                    Relation::from_i64(row.get_i64(1)?).map_err(assoc_db::DbError::from)?,
                    row.get_u64(2)?,
                )),
            })
        })
        .collect::<IsolationResult<Vec<_>>>()?;
    conflicts.sort();
    conflicts.dedup();
    if !conflicts.is_empty() {
        debug!(conflicts = conflicts.len(), "handles held by other sessions");
    }
    Ok(conflicts)
}
