use assoc_db::{sql_params, Connection};
use assoc_types::{Relation, SessionId, BLOB_TYPE_ID};

use crate::error::IsolationResult;
use crate::level::{handle_conflicts, Conflict, IsolationLevel};

/// Foreign blob handles on blobs this session journaled, or on the subject
/// or blob-typed object of metadata this session journaled.
const CONFLICTS: &str = "
select h.session_id, h.relation, h.relation_id
from journal j
join handle h on h.relation = j.relation and h.relation_id = j.relation_id
where j.session_id = ?1 and j.relation = ?2 and h.session_id != ?1
union
select h.session_id, h.relation, h.relation_id
from journal j
join metadata m on m.id = j.relation_id
join handle h on h.relation = ?2
    and (h.relation_id = m.blob_id
         or (m.object_type_id = ?4 and h.relation_id = cast(m.object as integer)))
where j.session_id = ?1 and j.relation = ?3 and h.session_id != ?1
";

/// Isolated when no other session holds a blob this session changed,
/// directly or through metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlobExclusive;

impl IsolationLevel for BlobExclusive {
    fn name(&self) -> &'static str {
        "blob-exclusive"
    }

    fn conflicts(
        &self,
        conn: &dyn Connection,
        session: SessionId,
    ) -> IsolationResult<Vec<Conflict>> {
        handle_conflicts(
            conn,
            CONFLICTS,
            &sql_params![session, Relation::Blob, Relation::Metadata, BLOB_TYPE_ID],
        )
    }
}
