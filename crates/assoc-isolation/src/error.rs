use assoc_db::DbError;

/// Errors from isolation evaluation.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// No level is registered under the requested name.
    #[error("{name} is not a valid isolation level (known: {known})")]
    UnknownLevel { name: String, known: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result alias for isolation evaluation.
pub type IsolationResult<T> = Result<T, IsolationError>;
