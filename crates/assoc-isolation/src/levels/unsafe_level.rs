use assoc_db::Connection;
use assoc_types::SessionId;

use crate::error::IsolationResult;
use crate::level::{Conflict, IsolationLevel};

/// Never reports a conflict. Commits still fail if the session's work was
/// invalidated by a removal that committed first.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unsafe;

impl IsolationLevel for Unsafe {
    fn name(&self) -> &'static str {
        "unsafe"
    }

    fn conflicts(
        &self,
        _conn: &dyn Connection,
        _session: SessionId,
    ) -> IsolationResult<Vec<Conflict>> {
        Ok(Vec::new())
    }
}
