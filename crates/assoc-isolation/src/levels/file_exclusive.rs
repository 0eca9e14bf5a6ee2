use assoc_db::{sql_params, Connection};
use assoc_types::{Relation, SessionId, BLOB_TYPE_ID};

use crate::error::IsolationResult;
use crate::level::{handle_conflicts, Conflict, IsolationLevel};

/// Foreign handles on any journaled object, on the file owning a journaled
/// blob, and on the subject/object blobs of journaled metadata or their
/// owning files.
const CONFLICTS: &str = "
select h.session_id, h.relation, h.relation_id
from journal j
join handle h on h.relation = j.relation and h.relation_id = j.relation_id
where j.session_id = ?1 and h.session_id != ?1
union
select h.session_id, h.relation, h.relation_id
from journal j
join blob b on b.id = j.relation_id
join handle h on h.relation = ?2 and h.relation_id = b.file_id
where j.session_id = ?1 and j.relation = ?3 and h.session_id != ?1
union
select h.session_id, h.relation, h.relation_id
from journal j
join metadata m on m.id = j.relation_id
join blob b on b.id = m.blob_id
    or (m.object_type_id = ?5 and b.id = cast(m.object as integer))
join handle h on (h.relation = ?3 and h.relation_id = b.id)
    or (h.relation = ?2 and h.relation_id = b.file_id)
where j.session_id = ?1 and j.relation = ?4 and h.session_id != ?1
";

/// Isolated when no other session holds any object this session changed,
/// nor a file containing one.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileExclusive;

impl IsolationLevel for FileExclusive {
    fn name(&self) -> &'static str {
        "file-exclusive"
    }

    fn conflicts(
        &self,
        conn: &dyn Connection,
        session: SessionId,
    ) -> IsolationResult<Vec<Conflict>> {
        handle_conflicts(
            conn,
            CONFLICTS,
            &sql_params![
                session,
                Relation::File,
                Relation::Blob,
                Relation::Metadata,
                BLOB_TYPE_ID
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use assoc_types::Operation;

    #[test]
    fn foreign_handle_on_owning_file() {
        let fx = Fixture::new();
        let me = fx.session();
        let other = fx.session();
        fx.blob(2, 1);
        fx.journal(me, Relation::Blob, 2, Operation::Add);
        fx.hold(other, Relation::File, 1);

        let conflicts = FileExclusive.conflicts(fx.conn(), me).unwrap();
        assert_eq!(
            conflicts,
            vec![Conflict {
                other,
                object: Some((Relation::File, 1))
            }]
        );
    }

    #[test]
    fn foreign_handle_on_journaled_file() {
        let fx = Fixture::new();
        let me = fx.session();
        let other = fx.session();
        fx.journal(me, Relation::File, 7, Operation::Add);
        fx.hold(other, Relation::File, 7);
        assert!(!FileExclusive.is_isolated(fx.conn(), me).unwrap());
    }

    #[test]
    fn metadata_reaches_object_blob_file() {
        let fx = Fixture::new();
        let me = fx.session();
        let other = fx.session();
        fx.blob(1, 1);
        fx.blob(2, 2);
        fx.triple(10, 1, Some(2));
        fx.journal(me, Relation::Metadata, 10, Operation::Add);
        fx.hold(other, Relation::File, 2);
        let conflicts = FileExclusive.conflicts(fx.conn(), me).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].object, Some((Relation::File, 2)));
    }

    #[test]
    fn literal_metadata_does_not_follow_object() {
        let fx = Fixture::new();
        let me = fx.session();
        let other = fx.session();
        fx.blob(1, 1);
        fx.blob(2, 2);
        // Literal object text "2" must not be read as a blob id.
        fx.literal_triple(10, 1, "2");
        fx.journal(me, Relation::Metadata, 10, Operation::Add);
        fx.hold(other, Relation::File, 2);
        assert!(FileExclusive.is_isolated(fx.conn(), me).unwrap());
    }

    #[test]
    fn disjoint_new_files_are_isolated() {
        let fx = Fixture::new();
        let me = fx.session();
        let other = fx.session();
        fx.blob(1, 1);
        fx.blob(2, 2);
        fx.journal(me, Relation::File, 1, Operation::Add);
        fx.journal(me, Relation::Blob, 1, Operation::Add);
        fx.journal(other, Relation::File, 2, Operation::Add);
        fx.journal(other, Relation::Blob, 2, Operation::Add);
        fx.hold(me, Relation::File, 1);
        fx.hold(me, Relation::Blob, 1);
        fx.hold(other, Relation::File, 2);
        fx.hold(other, Relation::Blob, 2);
        assert!(FileExclusive.is_isolated(fx.conn(), me).unwrap());
        assert!(FileExclusive.is_isolated(fx.conn(), other).unwrap());
    }
}
