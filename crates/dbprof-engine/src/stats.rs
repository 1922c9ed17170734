use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, error, info};

use dbprof_core::{ColumnMeta, Error, FreqValue, Result, TableMeta, Value};

use crate::dialect::FreqOrder;
use crate::driver::{Driver, QueryResult};
use crate::profiler::Profiler;

/// Single-scan statistics, computed over batches of columns.
#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Nulls,
    MinMax,
    Cardinality,
}

impl Aggregate {
    fn name(self) -> &'static str {
        match self {
            Aggregate::Nulls => "nulls",
            Aggregate::MinMax => "min_max",
            Aggregate::Cardinality => "cardinality",
        }
    }

    /// Fields per result row, column name included.
    fn width(self) -> usize {
        match self {
            Aggregate::Nulls | Aggregate::Cardinality => 2,
            Aggregate::MinMax => 3,
        }
    }
}

impl<D: Driver> Profiler<D> {
    /// Compute every enabled column statistic and merge it into `meta`.
    ///
    /// Statistics are all-or-nothing: the first failing query aborts the run.
    pub(crate) async fn run_column_profiling(
        &mut self,
        meta: &mut TableMeta,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if self.config.profile_nulls {
            self.profile_nulls(meta, timeout).await?;
        }
        if self.config.profile_min_max {
            self.profile_min_max(meta, timeout).await?;
        }
        if self.config.num_freq_values > 0 {
            self.profile_freq_values(meta, timeout).await?;
        } else {
            info!(event = "freq_values_skipped", reason = "num_freq_values is 0");
        }
        if self.config.profile_cardinality {
            self.profile_cardinality(meta, timeout).await?;
        }
        Ok(())
    }

    async fn statistic(
        &mut self,
        statistic: &'static str,
        sql: String,
        timeout: Option<Duration>,
    ) -> Result<QueryResult> {
        debug!(event = "statistic_query", statistic);
        self.query(&sql, timeout).await.map_err(|err| {
            error!(event = "statistic_failed", statistic, error = %err);
            err
        })
    }

    /// Run `aggregate` over `columns`, splitting them into batches the
    /// dialect can express, and key the rows by column name.
    async fn aggregate(
        &mut self,
        aggregate: Aggregate,
        meta: &TableMeta,
        columns: &[ColumnMeta],
        timeout: Option<Duration>,
    ) -> Result<BTreeMap<String, Vec<Value>>> {
        let schema = meta.schema_name.as_str();
        let table = meta.table_name.as_str();
        let batch_size = self.dialect.columns_per_query().max(1);
        let mut by_column = BTreeMap::new();

        info!(event = "statistic_started", statistic = aggregate.name());
        for batch in columns.chunks(batch_size) {
            let sql = match aggregate {
                Aggregate::Nulls => self.dialect.column_nulls(schema, table, batch),
                Aggregate::MinMax => self.dialect.column_min_max(schema, table, batch),
                Aggregate::Cardinality => self.dialect.column_cardinalities(schema, table, batch),
            };
            let result = self.statistic(aggregate.name(), sql, timeout).await?;
            let mut rows = rows_by_column(result, aggregate.width())?;
            for column in batch {
                let row = rows.remove(&column.name).ok_or_else(|| {
                    Error::Internal(format!(
                        "no {} result for column {}",
                        aggregate.name(),
                        column.name
                    ))
                })?;
                by_column.insert(column.name.clone(), row);
            }
        }
        info!(event = "statistic_finished", statistic = aggregate.name());
        Ok(by_column)
    }

    async fn profile_nulls(&mut self, meta: &mut TableMeta, timeout: Option<Duration>) -> Result<()> {
        let mut rows = self
            .aggregate(Aggregate::Nulls, meta, &meta.columns, timeout)
            .await?;
        for column in &mut meta.columns {
            let row = rows.remove(&column.name).unwrap_or_default();
            column.nulls = Some(count_at(&row, 1, &column.name)?);
        }
        Ok(())
    }

    async fn profile_min_max(&mut self, meta: &mut TableMeta, timeout: Option<Duration>) -> Result<()> {
        let columns: Vec<ColumnMeta> = meta
            .columns
            .iter()
            .filter(|column| self.dialect.has_min_max(column))
            .cloned()
            .collect();
        let mut rows = self
            .aggregate(Aggregate::MinMax, meta, &columns, timeout)
            .await?;

        for column in &mut meta.columns {
            if let Some(row) = rows.remove(&column.name) {
                column.min = row[1].to_text();
                column.max = row[2].to_text();
            }
        }
        Ok(())
    }

    /// One query per column and order, so each result holds at most
    /// `num_freq_values` rows.
    async fn profile_freq_values(
        &mut self,
        meta: &mut TableMeta,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let limit = self.config.num_freq_values;
        let most = self
            .freq_values(meta, FreqOrder::Most, limit, timeout)
            .await?;
        let least = self
            .freq_values(meta, FreqOrder::Least, limit, timeout)
            .await?;

        for ((column, most), least) in meta.columns.iter_mut().zip(most).zip(least) {
            column.most_freq_values = Some(most);
            column.least_freq_values = Some(least);
        }
        Ok(())
    }

    async fn freq_values(
        &mut self,
        meta: &TableMeta,
        order: FreqOrder,
        limit: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<FreqValue>>> {
        let statistic = match order {
            FreqOrder::Most => "most_freq_values",
            FreqOrder::Least => "least_freq_values",
        };

        info!(event = "statistic_started", statistic);
        let mut values = Vec::with_capacity(meta.columns.len());
        for column in &meta.columns {
            if !self.dialect.has_min_max(column) {
                values.push(Vec::new());
                continue;
            }
            let sql = self.dialect.column_freq_values(
                &meta.schema_name,
                &meta.table_name,
                column,
                limit,
                order,
            );
            let result = self.statistic(statistic, sql, timeout).await?;
            values.push(freq_list(&result, limit)?);
        }
        info!(event = "statistic_finished", statistic);
        Ok(values)
    }

    async fn profile_cardinality(
        &mut self,
        meta: &mut TableMeta,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut rows = self
            .aggregate(Aggregate::Cardinality, meta, &meta.columns, timeout)
            .await?;
        for column in &mut meta.columns {
            let row = rows.remove(&column.name).unwrap_or_default();
            column.cardinality = Some(count_at(&row, 1, &column.name)?);
        }
        Ok(())
    }
}

/// Index a one-row-per-column result by the column name in field 0.
fn rows_by_column(result: QueryResult, width: usize) -> Result<BTreeMap<String, Vec<Value>>> {
    let mut by_column = BTreeMap::new();
    for row in result.rows {
        if row.len() < width {
            return Err(Error::Internal(format!(
                "expected {width} fields per row, got {}: {}",
                row.len(),
                result.query
            )));
        }
        let Some(name) = row[0].to_text() else {
            return Err(Error::Internal(format!(
                "row without a column name: {}",
                result.query
            )));
        };
        if by_column.contains_key(&name) {
            return Err(Error::Internal(format!(
                "column {name} reported twice: {}",
                result.query
            )));
        }
        by_column.insert(name, row);
    }
    Ok(by_column)
}

/// Read `(value, count)` rows; NULL values are dropped.
fn freq_list(result: &QueryResult, limit: usize) -> Result<Vec<FreqValue>> {
    let mut values = Vec::with_capacity(result.rows.len().min(limit));
    for row in &result.rows {
        if row.len() < 2 {
            return Err(Error::Internal(format!(
                "expected (value, count) rows: {}",
                result.query
            )));
        }
        let Some(value) = row[0].to_text() else {
            continue;
        };
        let count = count_at(row, 1, &result.query)?;
        if values.len() < limit {
            values.push(FreqValue { value, count });
        }
    }
    Ok(values)
}

fn count_at(row: &[Value], index: usize, context: &str) -> Result<u64> {
    row.get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Internal(format!("expected a count at field {index}: {context}")))
}
