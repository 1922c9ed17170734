use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use dbprof_core::{
    DataType, Error, ProfilerConfig, Result, RowCountSource, RuleSet, SampleRows, TableMeta,
};

use crate::dialect::Dialect;
use crate::driver::{Driver, QueryResult};

/// Per-call knobs for [`Profiler::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Skip the row-level validation pass even when rules are supplied.
    pub skip_record_validation: bool,
    pub validation_rules: Option<&'a RuleSet>,
    /// Budget applied to every query of the run.
    pub timeout: Option<Duration>,
}

/// Why column statistics were not computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnGate {
    Config,
    TableProfilingDisabled,
    RowCountTimeout,
}

impl ColumnGate {
    fn as_str(self) -> &'static str {
        match self {
            ColumnGate::Config => "config",
            ColumnGate::TableProfilingDisabled => "table_profiling_disabled",
            ColumnGate::RowCountTimeout => "row_count_timeout",
        }
    }
}

/// Decisions taken during a single run. Dropped when the run ends, so a
/// forced skip never carries over to the next table or the next run.
#[derive(Debug)]
struct RunState {
    timeout: Option<Duration>,
    column_gate: Option<ColumnGate>,
}

impl RunState {
    fn new(config: &ProfilerConfig, timeout: Option<Duration>) -> Self {
        let column_gate = if config.skip_table_profiling {
            Some(ColumnGate::TableProfilingDisabled)
        } else if config.skip_column_profiling {
            Some(ColumnGate::Config)
        } else {
            None
        };
        Self {
            timeout,
            column_gate,
        }
    }

    fn skip_columns(&mut self, gate: ColumnGate) {
        if self.column_gate.is_none() {
            self.column_gate = Some(gate);
        }
    }
}

/// Profiles tables through one driver connection.
///
/// A profiler owns its connection and its configuration. Tables are
/// profiled strictly one step after another; run several profilers to
/// profile several tables at once.
pub struct Profiler<D: Driver> {
    pub(crate) driver: D,
    pub(crate) dialect: Box<dyn Dialect>,
    pub(crate) config: ProfilerConfig,
}

impl<D: Driver> Profiler<D> {
    pub fn new(driver: D, dialect: impl Dialect + 'static, config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        config.check_result_rows(driver.max_rows())?;
        Ok(Self {
            driver,
            dialect: Box::new(dialect),
            config,
        })
    }

    /// Connect if not connected yet. Failure here is fatal to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        if self.driver.is_connected() {
            return Ok(());
        }

        info!(event = "connecting", engine = self.driver.engine());
        self.driver.connect().await.map_err(|err| {
            error!(event = "connection_failed", error = %err);
            match err {
                Error::Connection(_) => err,
                other => Error::Connection(other.to_string()),
            }
        })?;
        info!(event = "connected", database = self.driver.database_name());
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.driver.disconnect().await
    }

    pub(crate) async fn query(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        self.connect().await?;
        trace!(event = "query", query = sql);
        self.driver.execute(sql, timeout).await.inspect_err(|err| {
            if err.is_timeout() {
                warn!(event = "query_timed_out", query = sql);
            } else {
                error!(event = "query_failed", query = sql, error = %err);
            }
        })
    }

    /// Schemas in the database, without the engine's system schemas.
    pub async fn schema_names(&mut self) -> Result<Vec<String>> {
        let sql = self.dialect.schema_names();
        let names = text_column(&self.query(&sql, None).await?)?;
        Ok(names
            .into_iter()
            .filter(|name| !self.dialect.is_system_schema(name))
            .collect())
    }

    pub async fn table_names(&mut self, schema: &str) -> Result<Vec<String>> {
        let sql = self.dialect.table_names(schema);
        text_column(&self.query(&sql, None).await?)
    }

    pub async fn column_names(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        self.fetch_column_names(schema, table, None).await
    }

    async fn fetch_column_names(
        &mut self,
        schema: &str,
        table: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        let sql = self.dialect.column_names(schema, table);
        text_column(&self.query(&sql, timeout).await?)
    }

    /// Profile one table and return its snapshot.
    ///
    /// Steps run in a fixed order; configuration, the row-count threshold and
    /// a row-count timeout can each end the run early with a partial
    /// snapshot. Any other failure aborts the run.
    pub async fn run(
        &mut self,
        schema: &str,
        table: &str,
        options: RunOptions<'_>,
    ) -> Result<TableMeta> {
        if schema.is_empty() || table.is_empty() {
            return Err(Error::InvalidConfig(
                "schema and table names are required".to_string(),
            ));
        }

        let mut state = RunState::new(&self.config, options.timeout);

        info!(event = "profiling_started", schema, table);
        if let Some(rules) = options.validation_rules {
            info!(event = "validation_rules", count = rules.len());
        }

        let mut meta = self.build_table_meta(schema, table, &state).await?;
        self.profile_data_types(&mut meta, &state).await?;
        self.profile_sample_rows(&mut meta, &state).await?;

        if self.config.skip_table_profiling {
            info!(event = "table_profiling_skipped", table = %meta.qualified_name());
            return Ok(finished(meta));
        }

        self.profile_row_count(&mut meta, &mut state).await?;

        if let Some(gate) = state.column_gate {
            info!(
                event = "column_profiling_skipped",
                table = %meta.qualified_name(),
                gate = gate.as_str()
            );
            return Ok(finished(meta));
        }

        if let Some(rows) = meta.row_count {
            if rows > self.config.column_profiling_threshold {
                info!(
                    event = "column_profiling_skipped",
                    table = %meta.qualified_name(),
                    gate = "threshold",
                    rows,
                    threshold = self.config.column_profiling_threshold
                );
                return Ok(finished(meta));
            }
        }

        self.run_column_profiling(&mut meta, state.timeout).await?;

        match options.validation_rules {
            Some(rules) => {
                self.run_record_validation(
                    &mut meta,
                    rules,
                    options.skip_record_validation,
                    state.timeout,
                )
                .await?;
                self.run_postscan_validation(&mut meta, rules, state.timeout)
                    .await?;
            }
            None => info!(event = "record_validation_skipped", reason = "no_rules"),
        }

        Ok(finished(meta))
    }

    async fn build_table_meta(
        &mut self,
        schema: &str,
        table: &str,
        state: &RunState,
    ) -> Result<TableMeta> {
        let column_names = self.fetch_column_names(schema, table, state.timeout).await?;
        debug!(event = "columns_discovered", count = column_names.len());
        TableMeta::new(self.driver.database_name(), schema, table, column_names)
    }

    async fn profile_data_types(&mut self, meta: &mut TableMeta, state: &RunState) -> Result<()> {
        info!(event = "data_types_started");
        let sql = self
            .dialect
            .column_datatypes(&meta.schema_name, &meta.table_name);
        let result = self.query(&sql, state.timeout).await?;

        if result.rows.is_empty() {
            error!(event = "data_types_missing", table = %meta.qualified_name());
            return Err(Error::Internal(format!(
                "could not get column data types of {}",
                meta.qualified_name()
            )));
        }

        let mut types = BTreeMap::new();
        for row in &result.rows {
            let (Some(name), Some(type_name)) = (
                row.first().and_then(|value| value.to_text()),
                row.get(1).and_then(|value| value.to_text()),
            ) else {
                return Err(Error::Internal(format!(
                    "malformed data type row: {}",
                    result.query
                )));
            };
            let length = row.get(2).and_then(|value| value.as_i64());
            types.insert(
                name,
                DataType {
                    name: type_name,
                    length,
                },
            );
        }

        let table_name = meta.qualified_name();
        for column in &mut meta.columns {
            let datatype = types.remove(&column.name).ok_or_else(|| {
                Error::Internal(format!(
                    "no data type reported for column {table_name}.{}",
                    column.name
                ))
            })?;
            column.datatype = Some(datatype);
        }

        info!(event = "data_types_finished");
        Ok(())
    }

    async fn profile_sample_rows(&mut self, meta: &mut TableMeta, state: &RunState) -> Result<()> {
        if !self.config.profile_sample_rows {
            info!(event = "sample_rows_skipped");
            return Ok(());
        }

        info!(event = "sample_rows_started");
        let sql = self.dialect.sample_rows(
            &meta.schema_name,
            &meta.table_name,
            &meta.column_names,
            self.config.sample_rows_limit,
        );
        let result = self.query(&sql, state.timeout).await?;
        meta.sample_rows = Some(SampleRows {
            header: result.column_names,
            rows: result.rows,
        });
        info!(event = "sample_rows_finished");
        Ok(())
    }

    async fn profile_row_count(&mut self, meta: &mut TableMeta, state: &mut RunState) -> Result<()> {
        if !self.config.profile_row_count {
            return Ok(());
        }

        info!(event = "row_count_started");
        let sql = self.dialect.row_count(&meta.schema_name, &meta.table_name);
        let (rows, source) = match self.query(&sql, state.timeout).await {
            Ok(result) => (result.single_count()?, RowCountSource::Exact),
            Err(err) if err.is_timeout() => {
                warn!(
                    event = "row_count_timeout",
                    table = %meta.qualified_name(),
                    "falling back to database statistics"
                );
                let sql = self
                    .dialect
                    .row_count_estimate(&meta.schema_name, &meta.table_name);
                let estimate = self.query(&sql, state.timeout).await?.single_count()?;
                // A table too slow to count is too slow to aggregate.
                state.skip_columns(ColumnGate::RowCountTimeout);
                (estimate, RowCountSource::Statistics)
            }
            Err(err) => {
                error!(event = "row_count_failed", error = %err);
                return Err(err);
            }
        };

        meta.set_row_count(rows, source)?;
        info!(event = "row_count_finished", rows, source = ?source);
        Ok(())
    }
}

fn finished(meta: TableMeta) -> TableMeta {
    info!(event = "profiling_finished", table = %meta.qualified_name());
    meta
}

fn text_column(result: &QueryResult) -> Result<Vec<String>> {
    result
        .rows
        .iter()
        .map(|row| {
            row.first().and_then(|value| value.to_text()).ok_or_else(|| {
                Error::Internal(format!("expected a name in every row: {}", result.query))
            })
        })
        .collect()
}
