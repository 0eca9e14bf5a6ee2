use assoc_types::TypeError;

/// Errors from the relational backing store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The SQLite engine rejected a statement or query.
    #[error("sqlite error in `{statement}`: {source}")]
    Sqlite {
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A data source string without a `<provider>:` part.
    #[error("{0} is not a valid data source")]
    InvalidDataSource(String),

    /// No provider is registered under the given name.
    #[error("{0} is not a valid connection provider")]
    UnknownProvider(String),

    /// Commit or rollback without a matching begin.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A column could not be read as the requested type.
    #[error("column {column}: {reason}")]
    Column { column: usize, reason: String },

    /// A persisted discriminant did not decode.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// I/O error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub(crate) fn sqlite(statement: &str, source: rusqlite::Error) -> Self {
        Self::Sqlite {
            statement: statement.to_string(),
            source,
        }
    }
}

/// Result alias for backing store operations.
pub type DbResult<T> = Result<T, DbError>;
