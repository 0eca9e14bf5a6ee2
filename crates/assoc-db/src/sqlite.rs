use std::cell::Cell;
use std::path::Path;
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use tracing::{debug, trace};

use crate::error::{DbError, DbResult};
use crate::schema;
use crate::traits::Connection;
use crate::value::{QueryResult, Row, SqlValue};

const STATEMENT_CACHE_CAPACITY: usize = 64;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            SqlValue::Text(String::from_utf8_lossy(t).into_owned())
        }
    }
}

/// SQLite-backed [`Connection`].
///
/// File databases run in WAL mode with a busy timeout so that several
/// processes can share one store. The outermost transaction is opened with
/// `BEGIN IMMEDIATE`, which takes the write lock up front.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    provider: &'static str,
    depth: Cell<u32>,
}

impl SqliteConnection {
    /// Open (or create) a database file and install the schema.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| DbError::sqlite(&format!("open {}", path.display()), e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| DbError::sqlite("busy_timeout", e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| DbError::sqlite("pragma journal_mode", e))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite database");
        Self::init(conn, "sqlite3")
    }

    /// A private in-memory database, gone when the connection drops.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| DbError::sqlite("open :memory:", e))?;
        Self::init(conn, "memory")
    }

    fn init(conn: rusqlite::Connection, provider: &'static str) -> DbResult<Self> {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        let this = Self {
            conn,
            provider,
            depth: Cell::new(0),
        };
        schema::install(&this)?;
        Ok(this)
    }

    fn savepoint_name(level: u32) -> String {
        format!("assoc_sp{level}")
    }
}

impl Connection for SqliteConnection {
    fn provider(&self) -> &str {
        self.provider
    }

    fn execute_statement(&self, sql: &str) -> DbResult<()> {
        trace!(sql, "execute");
        self.conn
            .execute_batch(sql)
            .map_err(|e| DbError::sqlite(sql, e))
    }

    fn statement(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        trace!(sql, ?params, "statement");
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| DbError::sqlite(sql, e))?;
        stmt.execute(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| DbError::sqlite(sql, e))
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<QueryResult> {
        trace!(sql, ?params, "query");
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| DbError::sqlite(sql, e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| DbError::sqlite(sql, e))?;

        let mut result = QueryResult {
            columns,
            rows: Vec::new(),
        };
        while let Some(row) = rows.next().map_err(|e| DbError::sqlite(sql, e))? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                let value = row.get_ref(i).map_err(|e| DbError::sqlite(sql, e))?;
                cells.push(from_value_ref(value));
            }
            result.rows.push(Row(cells));
        }
        Ok(result)
    }

    fn begin(&self) -> DbResult<()> {
        let depth = self.depth.get();
        if depth == 0 {
            self.execute_statement("BEGIN IMMEDIATE")?;
        } else {
            self.execute_statement(&format!("SAVEPOINT {}", Self::savepoint_name(depth)))?;
        }
        self.depth.set(depth + 1);
        Ok(())
    }

    fn commit(&self) -> DbResult<()> {
        let depth = self.depth.get().checked_sub(1).ok_or(DbError::NoTransaction)?;
        if depth == 0 {
            self.execute_statement("COMMIT")?;
        } else {
            self.execute_statement(&format!("RELEASE {}", Self::savepoint_name(depth)))?;
        }
        self.depth.set(depth);
        Ok(())
    }

    fn rollback(&self) -> DbResult<()> {
        let depth = self.depth.get().checked_sub(1).ok_or(DbError::NoTransaction)?;
        // The depth drops even if the backend fails so a broken level is not retried.
        self.depth.set(depth);
        if depth == 0 {
            self.execute_statement("ROLLBACK")
        } else {
            let name = Self::savepoint_name(depth);
            self.execute_statement(&format!("ROLLBACK TO {name}; RELEASE {name}"))
        }
    }

    fn transaction_depth(&self) -> u32 {
        self.depth.get()
    }
}
