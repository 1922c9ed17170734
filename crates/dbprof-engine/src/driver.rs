use std::time::Duration;

use async_trait::async_trait;

use dbprof_core::{Error, Result, Value};

/// Default cap on the rows a single `execute` call may materialize.
pub const DEFAULT_MAX_ROWS: usize = dbprof_core::MAX_RESULT_ROWS;

/// Materialized result of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// The first cell of a result expected to hold exactly one row.
    pub fn single_value(&self) -> Result<&Value> {
        match self.rows.as_slice() {
            [row] => row.first().ok_or_else(|| {
                Error::Internal(format!("query returned an empty row: {}", self.query))
            }),
            rows => Err(Error::Internal(format!(
                "expected one row, got {}: {}",
                rows.len(),
                self.query
            ))),
        }
    }

    /// Single-row result interpreted as a non-negative count.
    pub fn single_count(&self) -> Result<u64> {
        let value = self.single_value()?;
        value.as_u64().ok_or_else(|| {
            Error::Internal(format!("expected a count, got {value}: {}", self.query))
        })
    }
}

/// Connection to one database, implemented once per engine.
///
/// Implementations must report timeouts as [`Error::QueryTimeout`] so the
/// caller can tell them apart from other query failures.
#[async_trait(?Send)]
pub trait Driver: Send {
    /// Engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    /// Most rows one [`Driver::execute`] call returns before failing.
    fn max_rows(&self) -> usize {
        DEFAULT_MAX_ROWS
    }

    /// Name of the connected database.
    fn database_name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Open the connection. Calling this while connected is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection. Calling this while disconnected is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    /// Run a query and materialize its rows, up to the driver's row cap.
    async fn execute(&mut self, query: &str, timeout: Option<Duration>) -> Result<QueryResult>;

    /// Open a server-side cursor over `query` on the current connection.
    async fn open_cursor<'a>(
        &'a mut self,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Cursor + 'a>>;
}

/// Forward-only cursor returned by [`Driver::open_cursor`].
#[async_trait(?Send)]
pub trait Cursor: Send {
    fn column_names(&self) -> &[String];

    /// Fetch at most `max_rows` rows. An empty batch means the scan is done.
    async fn fetch_many(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>>;

    /// Release the cursor. Must be called even when a fetch failed.
    async fn close(&mut self) -> Result<()>;
}
