use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Column, Connection, Executor, Postgres, Statement, Transaction};
use tracing::{debug, warn};

use dbprof_core::{Error, Result, Value};

use crate::driver::{Cursor, DEFAULT_MAX_ROWS, Driver, QueryResult};
use crate::postgres::decode;

const CURSOR_NAME: &str = "dbprof_scan";
const QUERY_CANCELED: &str = "57014";

/// Single PostgreSQL connection driven through sqlx.
///
/// Query timeouts are enforced server-side with `statement_timeout`, so a
/// timed-out statement surfaces as SQLSTATE 57014.
pub struct PostgresDriver {
    options: PgConnectOptions,
    database: String,
    max_rows: usize,
    conn: Option<PgConnection>,
    applied_timeout: Option<Duration>,
}

impl PostgresDriver {
    pub fn new(url: &str) -> Result<Self> {
        let options: PgConnectOptions = url
            .parse()
            .map_err(|err: sqlx::Error| Error::Connection(err.to_string()))?;
        let database = options.get_database().unwrap_or_default().to_string();
        Ok(Self {
            options,
            database,
            max_rows: DEFAULT_MAX_ROWS,
            conn: None,
            applied_timeout: None,
        })
    }

    /// Cap on rows materialized by [`Driver::execute`].
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))
    }

    async fn apply_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.applied_timeout == timeout {
            return Ok(());
        }
        let millis = timeout.map_or(0, |budget| budget.as_millis().max(1));
        let sql = format!("set statement_timeout = {millis}");
        let conn = self.connection()?;
        sqlx::raw_sql(&sql)
            .execute(&mut *conn)
            .await
            .map_err(|err| map_error(err, &sql))?;
        self.applied_timeout = timeout;
        Ok(())
    }
}

#[async_trait(?Send)]
impl Driver for PostgresDriver {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;
        let database = sqlx::query_scalar::<_, String>("select current_database()")
            .fetch_one(&mut conn)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;
        sqlx::raw_sql("set statement_timeout = 0")
            .execute(&mut conn)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;

        self.database = database;
        self.applied_timeout = None;
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|err| Error::Connection(err.to_string()))?;
        }
        Ok(())
    }

    async fn execute(&mut self, query: &str, timeout: Option<Duration>) -> Result<QueryResult> {
        self.apply_timeout(timeout).await?;
        let max_rows = self.max_rows;
        let conn = self.connection()?;

        let mut column_names = None;
        let mut rows = Vec::new();
        {
            let mut stream = sqlx::query(query).fetch(&mut *conn);
            while let Some(row) = stream.try_next().await.map_err(|err| map_error(err, query))? {
                if rows.len() >= max_rows {
                    return Err(Error::RowLimit {
                        limit: max_rows,
                        query: query.to_string(),
                    });
                }
                if column_names.is_none() {
                    column_names = Some(decode::column_names(&row));
                }
                rows.push(decode::decode_row(&row)?);
            }
        }

        let column_names = match column_names {
            Some(names) => names,
            None => statement_columns(conn, query).await?,
        };

        Ok(QueryResult {
            query: query.to_string(),
            column_names,
            rows,
        })
    }

    async fn open_cursor<'a>(
        &'a mut self,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Cursor + 'a>> {
        self.apply_timeout(timeout).await?;
        let conn = self.connection()?;

        let mut tx = conn.begin().await.map_err(|err| map_error(err, "begin"))?;
        let column_names = statement_columns(&mut *tx, query).await?;
        let declare = format!("declare {CURSOR_NAME} no scroll cursor for {query}");
        if let Err(err) = sqlx::raw_sql(&declare).execute(&mut *tx).await {
            let err = map_error(err, &declare);
            if let Err(rollback) = tx.rollback().await {
                warn!(event = "cursor_rollback_failed", error = %rollback);
            }
            return Err(err);
        }
        debug!(event = "cursor_opened", cursor = CURSOR_NAME);

        Ok(Box::new(PostgresCursor {
            tx: Some(tx),
            column_names,
            failed: false,
        }))
    }
}

/// Server-side cursor living inside its own transaction.
///
/// Closing rolls the transaction back, which also releases the cursor when a
/// failed fetch left the transaction aborted.
pub struct PostgresCursor<'c> {
    tx: Option<Transaction<'c, Postgres>>,
    column_names: Vec<String>,
    failed: bool,
}

#[async_trait(?Send)]
impl Cursor for PostgresCursor<'_> {
    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    async fn fetch_many(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| Error::Internal("cursor is closed".to_string()))?;
        let sql = format!("fetch forward {max_rows} from {CURSOR_NAME}");

        let rows = match sqlx::raw_sql(&sql).fetch_all(&mut **tx).await {
            Ok(rows) => rows,
            Err(err) => {
                self.failed = true;
                return Err(map_error(err, &sql));
            }
        };
        rows.iter().map(decode::decode_row).collect()
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut tx) = self.tx.take() else {
            return Ok(());
        };

        let sql = format!("close {CURSOR_NAME}");
        let closed = if self.failed {
            Ok(())
        } else {
            sqlx::raw_sql(&sql)
                .execute(&mut *tx)
                .await
                .map(|_| ())
                .map_err(|err| map_error(err, &sql))
        };
        let rolled_back = tx.rollback().await.map_err(|err| map_error(err, "rollback"));
        debug!(event = "cursor_closed", cursor = CURSOR_NAME);

        closed?;
        rolled_back
    }
}

async fn statement_columns(conn: &mut PgConnection, query: &str) -> Result<Vec<String>> {
    let statement = (&mut *conn)
        .prepare(query)
        .await
        .map_err(|err| map_error(err, query))?;
    Ok(statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect())
}

fn map_error(err: sqlx::Error, query: &str) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(QUERY_CANCELED) {
            return Error::QueryTimeout {
                query: query.to_string(),
            };
        }
    }
    Error::Query {
        message: err.to_string(),
        query: query.to_string(),
    }
}
