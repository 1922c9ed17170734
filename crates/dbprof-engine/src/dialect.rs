use dbprof_core::ColumnMeta;

/// Ordering for frequent-value queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqOrder {
    /// Highest counts first.
    Most,
    /// Lowest counts first.
    Least,
}

/// Query text for every operation the profiler needs, per database engine.
///
/// Each method documents the row shape the profiler expects back. Aggregate
/// queries return one row per column, keyed by column name in the first
/// field, so results never depend on column position.
pub trait Dialect: Send + Sync {
    fn engine(&self) -> &'static str;

    /// Most columns one aggregate query may cover; wider tables are split.
    fn columns_per_query(&self) -> usize {
        usize::MAX
    }

    /// Whether min/max and frequent values are computed for this column.
    fn has_min_max(&self, _column: &ColumnMeta) -> bool {
        true
    }

    /// Quote an identifier for use in query text.
    fn quote_ident(&self, name: &str) -> String;

    /// Schemas that discovery leaves out unless asked for by name.
    fn is_system_schema(&self, _name: &str) -> bool {
        false
    }

    /// Rows: `(schema_name)`.
    fn schema_names(&self) -> String;

    /// Rows: `(table_name)`.
    fn table_names(&self, schema: &str) -> String;

    /// Rows: `(column_name)` in ordinal order.
    fn column_names(&self, schema: &str, table: &str) -> String;

    /// Rows: `(column_name, type_name, length)`; length may be NULL.
    fn column_datatypes(&self, schema: &str, table: &str) -> String;

    /// Up to `limit` rows of `columns`; result column names form the header.
    fn sample_rows(&self, schema: &str, table: &str, columns: &[String], limit: usize) -> String;

    /// One row, one field: exact row count.
    fn row_count(&self, schema: &str, table: &str) -> String;

    /// One row, one field: the engine's own row estimate.
    fn row_count_estimate(&self, schema: &str, table: &str) -> String;

    /// Rows: `(column_name, nulls)`.
    fn column_nulls(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String;

    /// Rows: `(column_name, min, max)` with min/max as text.
    fn column_min_max(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String;

    /// Rows: `(value, count)` for one column, at most `limit`, in `order`,
    /// ties broken by value. NULL values are not counted.
    fn column_freq_values(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnMeta,
        limit: usize,
        order: FreqOrder,
    ) -> String;

    /// Rows: `(column_name, cardinality)`; NULL is not a distinct value.
    fn column_cardinalities(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String;

    /// Every row of `columns`, for streaming through a cursor.
    fn record_scan(&self, schema: &str, table: &str, columns: &[String]) -> String;

    /// Substitute `{schema}` and `{table}` in a user-supplied rule query.
    fn render_rule_query(&self, template: &str, schema: &str, table: &str) -> String {
        template
            .replace("{schema}", &self.quote_ident(schema))
            .replace("{table}", &self.quote_ident(table))
    }
}
