use thiserror::Error;

/// Core error type shared across dbprof crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A driver connection could not be established.
    #[error("connection error: {0}")]
    Connection(String),
    /// The database rejected or failed a query.
    #[error("query error: {message}; query: {query}")]
    Query { message: String, query: String },
    /// The query exceeded its time budget.
    #[error("query timed out: {query}")]
    QueryTimeout { query: String },
    /// The result set exceeded the driver's row cap.
    #[error("result exceeded the row limit ({limit})")]
    RowLimit { limit: usize, query: String },
    /// Discovery produced data that violates internal invariants.
    #[error("internal error: {0}")]
    Internal(String),
    /// Profiler configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A validation rule could not be loaded or bound to the table.
    #[error("invalid validation rule: {0}")]
    InvalidRule(String),
}

impl Error {
    /// Query text attached to the error, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            Error::Query { query, .. }
            | Error::QueryTimeout { query }
            | Error::RowLimit { query, .. } => Some(query),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::QueryTimeout { .. })
    }
}

/// Convenience alias for results returned by dbprof crates.
pub type Result<T> = std::result::Result<T, Error>;
