use assoc_db::{sql_params, Connection};
use assoc_types::SessionId;
use tracing::debug;

use crate::error::IsolationResult;
use crate::level::{Conflict, IsolationLevel};

/// Isolated only when no other session exists at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct Full;

impl IsolationLevel for Full {
    fn name(&self) -> &'static str {
        "full"
    }

    fn conflicts(
        &self,
        conn: &dyn Connection,
        session: SessionId,
    ) -> IsolationResult<Vec<Conflict>> {
        let rows = conn.query(
            "select id from session where id != ?1 order by id",
            &sql_params![session],
        )?;
        let conflicts = rows
            .iter()
            .map(|row| -> IsolationResult<Conflict> {
                Ok(Conflict {
                    other: SessionId::new(row.get_u64(0)?),
                    object: None,
                })
            })
            .collect::<IsolationResult<Vec<_>>>()?;
        if !conflicts.is_empty() {
            debug!(session = %session, others = conflicts.len(), "other sessions open");
        }
        Ok(conflicts)
    }
}
