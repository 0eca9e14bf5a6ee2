//! In-memory store rows for exercising the predicates.

use assoc_db::{journal, sessions, sql_params, Connection, SqliteConnection};
use assoc_types::{Operation, Relation, SessionId, BLOB_TYPE_ID};

pub(crate) struct Fixture {
    conn: Box<dyn Connection>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            conn: Box::new(SqliteConnection::open_in_memory().unwrap()),
        }
    }

    pub fn conn(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    pub fn session(&self) -> SessionId {
        sessions::create(self.conn(), std::process::id()).unwrap()
    }

    /// A visible blob, creating its file on first use.
    pub fn blob(&self, id: u64, file_id: u64) {
        self.conn
            .statement(
                "insert or ignore into file (id, uuid, visible, reserved) values (?1, ?2, 1, 0)",
                &sql_params![file_id, format!("uuid-{file_id}")],
            )
            .unwrap();
        self.conn
            .statement(
                "insert into blob (id, file_id, name, content_type_id, visible) \
                 values (?1, ?2, ?3, 0, 1)",
                &sql_params![id, file_id, format!("blob-{id}")],
            )
            .unwrap();
    }

    /// A metadata row about `subject`; with `object_blob` it references that blob.
    pub fn triple(&self, id: u64, subject: u64, object_blob: Option<u64>) {
        match object_blob {
            Some(object) => self.metadata(id, subject, BLOB_TYPE_ID, &object.to_string()),
            None => self.literal_triple(id, subject, "literal"),
        }
    }

    pub fn literal_triple(&self, id: u64, subject: u64, object: &str) {
        self.metadata(id, subject, 1, object);
    }

    fn metadata(&self, id: u64, subject: u64, type_id: u64, object: &str) {
        self.conn
            .statement(
                "insert into metadata \
                 (id, blob_id, predicate_prefix_id, predicate, object_type_id, object, visible) \
                 values (?1, ?2, 0, 'p', ?3, ?4, 1)",
                &sql_params![id, subject, type_id, object],
            )
            .unwrap();
    }

    pub fn journal(&self, session: SessionId, relation: Relation, id: u64, op: Operation) {
        journal::record(self.conn(), session, relation, id, op, None).unwrap();
    }

    pub fn hold(&self, session: SessionId, relation: Relation, id: u64) {
        self.conn().open_handle(relation, id, session).unwrap();
    }
}
