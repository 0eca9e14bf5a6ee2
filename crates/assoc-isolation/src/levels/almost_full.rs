use assoc_db::{sql_params, Connection};
use assoc_types::SessionId;

use crate::error::IsolationResult;
use crate::level::{handle_conflicts, Conflict, IsolationLevel};

/// Isolated when no other session holds a handle on anything.
///
/// Idle sessions that hold no objects do not block the commit.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlmostFull;

impl IsolationLevel for AlmostFull {
    fn name(&self) -> &'static str {
        "almost-full"
    }

    fn conflicts(
        &self,
        conn: &dyn Connection,
        session: SessionId,
    ) -> IsolationResult<Vec<Conflict>> {
        handle_conflicts(
            conn,
            "select session_id, relation, relation_id from handle where session_id != ?1",
            &sql_params![session],
        )
    }
}
