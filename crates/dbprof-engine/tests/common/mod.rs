#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use dbprof_core::{ColumnMeta, Error, Result, Value};
use dbprof_engine::{Cursor, Dialect, Driver, FreqOrder, Profiler, ProfilerConfig, QueryResult};

/// In-memory table answering the queries emitted by [`TestDialect`].
#[derive(Debug, Clone)]
pub struct FakeTable {
    pub schema: String,
    pub table: String,
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<Value>>,
}

impl FakeTable {
    pub fn new(schema: &str, table: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            columns: columns
                .iter()
                .map(|(name, datatype)| (name.to_string(), datatype.to_string()))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn values(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }
}

/// Knobs and call log shared between a test and its driver.
#[derive(Debug, Default)]
pub struct Script {
    pub queries: Vec<String>,
    pub fetch_sizes: Vec<usize>,
    pub cursor_closes: usize,
    pub connects: usize,
    pub fail_connect: bool,
    pub timeout_ops: BTreeSet<String>,
    pub fail_ops: BTreeSet<String>,
    pub row_count_override: Option<u64>,
    pub missing_datatype: Option<String>,
    pub fail_fetch_at: Option<usize>,
}

impl Script {
    pub fn ops(&self) -> Vec<String> {
        self.queries.iter().map(|query| op_of(query).to_string()).collect()
    }

    pub fn count_op(&self, op: &str) -> usize {
        self.queries.iter().filter(|query| op_of(query) == op).count()
    }
}

#[derive(Clone, Default)]
pub struct Handle(Arc<Mutex<Script>>);

impl Handle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn op_of(query: &str) -> &str {
    query.split('|').next().unwrap_or_default()
}

pub struct ScriptedDriver {
    tables: Vec<FakeTable>,
    handle: Handle,
    connected: bool,
}

impl ScriptedDriver {
    pub fn new(tables: Vec<FakeTable>) -> (Self, Handle) {
        let handle = Handle::default();
        (
            Self {
                tables,
                handle: handle.clone(),
                connected: false,
            },
            handle,
        )
    }

    fn table(&self, schema: &str, table: &str) -> Result<&FakeTable> {
        self.tables
            .iter()
            .find(|item| item.schema == schema && item.table == table)
            .ok_or_else(|| Error::Query {
                message: format!("relation {schema}.{table} does not exist"),
                query: String::new(),
            })
    }

    fn answer(&self, query: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let parts: Vec<&str> = query.split('|').collect();
        let op = parts[0];

        if op == "schemas" {
            let schemas: BTreeSet<&str> = self.tables.iter().map(|t| t.schema.as_str()).collect();
            let mut names: Vec<&str> = schemas.into_iter().collect();
            names.push("pg_catalog");
            return Ok(one_column("schema_name", names.into_iter().map(Value::from)));
        }
        if op == "tables" {
            let names = self
                .tables
                .iter()
                .filter(|t| t.schema == parts[1])
                .map(|t| Value::from(t.table.as_str()));
            return Ok(one_column("table_name", names));
        }
        if op == "fixed" {
            let count: i64 = parts[1].parse().unwrap_or_default();
            return Ok(one_column("count", [Value::Int(count)].into_iter()));
        }

        let table = self.table(parts[1], parts[2])?;
        let script = self.handle.lock();
        let answer = match op {
            "columns" => one_column("column_name", table.names().into_iter().map(Value::from)),
            "datatypes" => (
                names(&["column_name", "data_type", "length"]),
                table
                    .columns
                    .iter()
                    .filter(|(name, _)| script.missing_datatype.as_deref() != Some(name.as_str()))
                    .map(|(name, datatype)| {
                        vec![Value::from(name.as_str()), Value::from(datatype.as_str()), Value::Null]
                    })
                    .collect(),
            ),
            "sample" => {
                let limit: usize = parts[3].parse().unwrap_or_default();
                (table.names(), table.rows.iter().take(limit).cloned().collect())
            }
            "row_count" | "estimate" => {
                let rows = script
                    .row_count_override
                    .unwrap_or(table.rows.len() as u64);
                one_column("count", [Value::Int(rows as i64)].into_iter())
            }
            "nulls" => per_column(table, parts[3], &["column_name", "nulls"], |values| {
                let nulls = values.iter().filter(|value| value.is_null()).count();
                vec![Value::Int(nulls as i64)]
            }),
            "minmax" => per_column(table, parts[3], &["column_name", "min", "max"], |values| {
                let (min, max) = min_max(values);
                vec![min, max]
            }),
            "most" | "least" => {
                let limit: usize = parts[3].parse().unwrap_or_default();
                let order = if op == "most" {
                    FreqOrder::Most
                } else {
                    FreqOrder::Least
                };
                freq_values(table, parts[4], limit, order)
            }
            "cardinality" => per_column(table, parts[3], &["column_name", "cardinality"], |values| {
                let distinct: BTreeSet<String> =
                    values.iter().filter_map(|value| value.to_text()).collect();
                vec![Value::Int(distinct.len() as i64)]
            }),
            other => {
                return Err(Error::Query {
                    message: format!("unknown op {other}"),
                    query: query.to_string(),
                });
            }
        };
        Ok(answer)
    }
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn one_column(
    name: &str,
    values: impl Iterator<Item = Value>,
) -> (Vec<String>, Vec<Vec<Value>>) {
    (vec![name.to_string()], values.map(|value| vec![value]).collect())
}

/// One row per column named in the comma-separated `wanted` list.
fn per_column(
    table: &FakeTable,
    wanted: &str,
    header: &[&str],
    compute: impl Fn(&[Value]) -> Vec<Value>,
) -> (Vec<String>, Vec<Vec<Value>>) {
    let wanted: BTreeSet<&str> = wanted.split(',').collect();
    let rows = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| wanted.contains(name.as_str()))
        .map(|(index, (name, _))| {
            let values: Vec<Value> = table.values(index).cloned().collect();
            let mut row = vec![Value::from(name.as_str())];
            row.extend(compute(&values));
            row
        })
        .collect();
    (names(header), rows)
}

fn min_max(values: &[Value]) -> (Value, Value) {
    let present: Vec<&Value> = values.iter().filter(|value| !value.is_null()).collect();
    if present.is_empty() {
        return (Value::Null, Value::Null);
    }
    let numbers: Option<Vec<i64>> = present.iter().map(|value| value.as_i64()).collect();
    if let Some(numbers) = numbers {
        let min = numbers.iter().min().copied().unwrap_or_default();
        let max = numbers.iter().max().copied().unwrap_or_default();
        return (Value::Text(min.to_string()), Value::Text(max.to_string()));
    }
    let texts: Vec<String> = present.iter().filter_map(|value| value.to_text()).collect();
    let min = texts.iter().min().cloned().unwrap_or_default();
    let max = texts.iter().max().cloned().unwrap_or_default();
    (Value::Text(min), Value::Text(max))
}

fn freq_values(
    table: &FakeTable,
    column: &str,
    limit: usize,
    order: FreqOrder,
) -> (Vec<String>, Vec<Vec<Value>>) {
    let index = table
        .columns
        .iter()
        .position(|(name, _)| name == column)
        .unwrap_or(usize::MAX);
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for value in table.values(index) {
        if let Some(text) = value.to_text() {
            *counts.entry(text).or_default() += 1;
        }
    }
    let mut counts: Vec<(String, i64)> = counts.into_iter().collect();
    counts.sort_by(|left, right| match order {
        FreqOrder::Most => right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)),
        FreqOrder::Least => left.1.cmp(&right.1).then_with(|| left.0.cmp(&right.0)),
    });
    let rows = counts
        .into_iter()
        .take(limit)
        .map(|(value, count)| vec![Value::Text(value), Value::Int(count)])
        .collect();
    (names(&["value", "freq"]), rows)
}

#[async_trait(?Send)]
impl Driver for ScriptedDriver {
    fn engine(&self) -> &'static str {
        "scripted"
    }

    fn database_name(&self) -> &str {
        "testdb"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut script = self.handle.lock();
        script.connects += 1;
        if script.fail_connect {
            return Err(Error::Connection("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn execute(&mut self, query: &str, _timeout: Option<Duration>) -> Result<QueryResult> {
        let op = op_of(query).to_string();
        {
            let mut script = self.handle.lock();
            script.queries.push(query.to_string());
            if script.timeout_ops.contains(&op) {
                return Err(Error::QueryTimeout {
                    query: query.to_string(),
                });
            }
            if script.fail_ops.contains(&op) {
                return Err(Error::Query {
                    message: "scripted failure".to_string(),
                    query: query.to_string(),
                });
            }
        }

        let (column_names, rows) = self.answer(query)?;
        Ok(QueryResult {
            query: query.to_string(),
            column_names,
            rows,
        })
    }

    async fn open_cursor<'a>(
        &'a mut self,
        query: &str,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn Cursor + 'a>> {
        self.handle.lock().queries.push(query.to_string());
        let parts: Vec<&str> = query.split('|').collect();
        let table = self.table(parts[1], parts[2])?;
        Ok(Box::new(ScriptedCursor {
            column_names: table.names(),
            rows: table.rows.iter().cloned().collect(),
            handle: self.handle.clone(),
            fetches: 0,
        }))
    }
}

struct ScriptedCursor {
    column_names: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    handle: Handle,
    fetches: usize,
}

#[async_trait(?Send)]
impl Cursor for ScriptedCursor {
    fn column_names(&self) -> &[String] {
        &self.column_names
    }

    async fn fetch_many(&mut self, max_rows: usize) -> Result<Vec<Vec<Value>>> {
        let mut script = self.handle.lock();
        script.fetch_sizes.push(max_rows);
        if script.fail_fetch_at == Some(self.fetches) {
            return Err(Error::Query {
                message: "connection reset".to_string(),
                query: "fetch".to_string(),
            });
        }
        self.fetches += 1;
        let take = max_rows.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.lock().cursor_closes += 1;
        Ok(())
    }
}

/// Dialect emitting `op|schema|table|arg` strings for [`ScriptedDriver`].
///
/// Aggregate queries list their columns as `a,b,c`; binary columns have no
/// min/max.
pub struct TestDialect {
    pub columns_per_query: usize,
}

impl Default for TestDialect {
    fn default() -> Self {
        Self {
            columns_per_query: 64,
        }
    }
}

fn column_list(columns: &[ColumnMeta]) -> String {
    columns
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl Dialect for TestDialect {
    fn engine(&self) -> &'static str {
        "scripted"
    }

    fn columns_per_query(&self) -> usize {
        self.columns_per_query
    }

    fn has_min_max(&self, column: &ColumnMeta) -> bool {
        column
            .datatype
            .as_ref()
            .is_none_or(|datatype| datatype.name != "bytea")
    }

    fn quote_ident(&self, name: &str) -> String {
        name.to_string()
    }

    fn is_system_schema(&self, name: &str) -> bool {
        name.starts_with("pg_")
    }

    fn schema_names(&self) -> String {
        "schemas".to_string()
    }

    fn table_names(&self, schema: &str) -> String {
        format!("tables|{schema}")
    }

    fn column_names(&self, schema: &str, table: &str) -> String {
        format!("columns|{schema}|{table}")
    }

    fn column_datatypes(&self, schema: &str, table: &str) -> String {
        format!("datatypes|{schema}|{table}")
    }

    fn sample_rows(&self, schema: &str, table: &str, _columns: &[String], limit: usize) -> String {
        format!("sample|{schema}|{table}|{limit}")
    }

    fn row_count(&self, schema: &str, table: &str) -> String {
        format!("row_count|{schema}|{table}")
    }

    fn row_count_estimate(&self, schema: &str, table: &str) -> String {
        format!("estimate|{schema}|{table}")
    }

    fn column_nulls(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        format!("nulls|{schema}|{table}|{}", column_list(columns))
    }

    fn column_min_max(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        format!("minmax|{schema}|{table}|{}", column_list(columns))
    }

    fn column_freq_values(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnMeta,
        limit: usize,
        order: FreqOrder,
    ) -> String {
        let op = match order {
            FreqOrder::Most => "most",
            FreqOrder::Least => "least",
        };
        format!("{op}|{schema}|{table}|{limit}|{}", column.name)
    }

    fn column_cardinalities(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        format!("cardinality|{schema}|{table}|{}", column_list(columns))
    }

    fn record_scan(&self, schema: &str, table: &str, _columns: &[String]) -> String {
        format!("scan|{schema}|{table}")
    }
}

/// `public.users`: id, email, age, country, note over 100 rows.
///
/// Every 10th email is NULL, ages run 18..=67 twice, note is always NULL.
pub fn users_table() -> FakeTable {
    let rows = (0..100i64)
        .map(|id| {
            let email = if id % 10 == 0 {
                Value::Null
            } else {
                Value::Text(format!("user{id}@example.com"))
            };
            let country = match id % 4 {
                0 | 1 => "BR",
                2 => "PT",
                _ => "AO",
            };
            vec![
                Value::Int(id),
                email,
                Value::Int(18 + id % 50),
                Value::from(country),
                Value::Null,
            ]
        })
        .collect();
    FakeTable::new(
        "public",
        "users",
        &[
            ("id", "integer"),
            ("email", "text"),
            ("age", "integer"),
            ("country", "character"),
            ("note", "text"),
        ],
    )
    .with_rows(rows)
}

pub fn profiler(
    tables: Vec<FakeTable>,
    config: ProfilerConfig,
) -> (Profiler<ScriptedDriver>, Handle) {
    profiler_with_dialect(tables, config, TestDialect::default())
}

pub fn profiler_with_dialect(
    tables: Vec<FakeTable>,
    config: ProfilerConfig,
    dialect: TestDialect,
) -> (Profiler<ScriptedDriver>, Handle) {
    let (driver, handle) = ScriptedDriver::new(tables);
    let profiler = Profiler::new(driver, dialect, config).expect("valid config");
    (profiler, handle)
}
