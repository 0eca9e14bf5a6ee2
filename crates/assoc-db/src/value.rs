//! Backend-neutral parameter and result values.

use std::fmt;

use assoc_types::{Operation, Relation, SessionId};

use crate::error::{DbError, DbResult};

/// A single bound parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(i64::from(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

impl From<SessionId> for SqlValue {
    fn from(v: SessionId) -> Self {
        SqlValue::from(v.get())
    }
}

impl From<Relation> for SqlValue {
    fn from(v: Relation) -> Self {
        SqlValue::Integer(v.as_i64())
    }
}

impl From<Operation> for SqlValue {
    fn from(v: Operation) -> Self {
        SqlValue::Integer(v.as_i64())
    }
}

/// Builds a parameter slice from heterogeneous values.
///
/// ```
/// use assoc_db::{sql_params, SqlValue};
/// let p = sql_params![1u64, "name", true];
/// assert_eq!(p[1], SqlValue::Text("name".into()));
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {{
        let empty: [$crate::SqlValue; 0] = [];
        empty
    }};
    ($($v:expr),+ $(,)?) => { [$($crate::SqlValue::from($v)),+] };
}

/// One row of a [`QueryResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    fn cell(&self, column: usize) -> DbResult<&SqlValue> {
        self.0.get(column).ok_or_else(|| DbError::Column {
            column,
            reason: format!("row has only {} columns", self.0.len()),
        })
    }

    pub fn get_i64(&self, column: usize) -> DbResult<i64> {
        match self.cell(column)? {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Text(s) => s.parse().map_err(|_| DbError::Column {
                column,
                reason: format!("'{s}' is not an integer"),
            }),
            other => Err(DbError::Column {
                column,
                reason: format!("expected integer, got {other:?}"),
            }),
        }
    }

    pub fn get_u64(&self, column: usize) -> DbResult<u64> {
        let v = self.get_i64(column)?;
        u64::try_from(v).map_err(|_| DbError::Column {
            column,
            reason: format!("{v} is negative"),
        })
    }

    pub fn get_bool(&self, column: usize) -> DbResult<bool> {
        Ok(self.get_i64(column)? != 0)
    }

    pub fn get_str(&self, column: usize) -> DbResult<&str> {
        match self.cell(column)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(DbError::Column {
                column,
                reason: format!("expected text, got {other:?}"),
            }),
        }
    }

    pub fn get_opt_str(&self, column: usize) -> DbResult<Option<&str>> {
        match self.cell(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_str(column).map(Some),
        }
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.0
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Renders as a pipe-delimited table with a header row.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.0.iter().map(ToString::to_string).collect())
            .collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let line = |f: &mut fmt::Formatter<'_>, items: &[String]| -> fmt::Result {
            f.write_str("|")?;
            for (item, &width) in items.iter().zip(&widths) {
                write!(f, " {item:<width$} |")?;
            }
            writeln!(f)
        };

        line(f, &self.columns)?;
        for row in &cells {
            line(f, row)?;
        }
        Ok(())
    }
}
