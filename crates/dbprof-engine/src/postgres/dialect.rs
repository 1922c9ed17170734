use dbprof_core::ColumnMeta;

use crate::dialect::{Dialect, FreqOrder};

/// PostgreSQL target lists hold at most 1664 entries; min/max takes two per
/// column.
const COLUMNS_PER_QUERY: usize = 800;

/// Types without min/max or frequent values.
const BINARY_TYPES: &[&str] = &["bytea"];

/// PostgreSQL query text.
///
/// Aggregate queries scan the table once per batch of columns and unpivot
/// the aggregates with a lateral `values` list, one output row per column.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn table(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    fn text_columns(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|name| {
                let ident = self.quote_ident(name);
                format!("{ident}::text as {ident}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn unpivot(&self, aggregates: Vec<String>, rows: Vec<String>, output: &str, source: &str) -> String {
        format!(
            "select v.* from (select {} from {source}) s cross join lateral (values {}) as v({output})",
            aggregates.join(", "),
            rows.join(", ")
        )
    }
}

impl Dialect for PostgresDialect {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn columns_per_query(&self) -> usize {
        COLUMNS_PER_QUERY
    }

    fn has_min_max(&self, column: &ColumnMeta) -> bool {
        column
            .datatype
            .as_ref()
            .is_none_or(|datatype| !BINARY_TYPES.contains(&datatype.name.as_str()))
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn is_system_schema(&self, name: &str) -> bool {
        name.starts_with("pg_") || name == "information_schema"
    }

    fn schema_names(&self) -> String {
        "select nspname::text from pg_namespace order by nspname".to_string()
    }

    fn table_names(&self, schema: &str) -> String {
        format!(
            "select c.relname::text from pg_class c \
             join pg_namespace n on n.oid = c.relnamespace \
             where n.nspname = {} and c.relkind in ('r', 'p', 'm', 'f') \
             order by c.relname",
            quote_literal(schema)
        )
    }

    fn column_names(&self, schema: &str, table: &str) -> String {
        format!(
            "select a.attname::text from pg_attribute a \
             join pg_class c on c.oid = a.attrelid \
             join pg_namespace n on n.oid = c.relnamespace \
             where n.nspname = {} and c.relname = {} \
             and a.attnum > 0 and not a.attisdropped \
             order by a.attnum",
            quote_literal(schema),
            quote_literal(table)
        )
    }

    fn column_datatypes(&self, schema: &str, table: &str) -> String {
        format!(
            "select column_name::text, data_type::text, character_maximum_length::bigint \
             from information_schema.columns \
             where table_schema = {} and table_name = {} \
             order by ordinal_position",
            quote_literal(schema),
            quote_literal(table)
        )
    }

    fn sample_rows(&self, schema: &str, table: &str, columns: &[String], limit: usize) -> String {
        format!(
            "select {} from {} limit {limit}",
            self.text_columns(columns),
            self.table(schema, table)
        )
    }

    fn row_count(&self, schema: &str, table: &str) -> String {
        format!("select count(*) from {}", self.table(schema, table))
    }

    fn row_count_estimate(&self, schema: &str, table: &str) -> String {
        format!(
            "select greatest(c.reltuples, 0)::bigint from pg_class c \
             join pg_namespace n on n.oid = c.relnamespace \
             where n.nspname = {} and c.relname = {}",
            quote_literal(schema),
            quote_literal(table)
        )
    }

    fn column_nulls(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        let mut aggregates = Vec::with_capacity(columns.len());
        let mut rows = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            aggregates.push(format!(
                "count(*) - count({}) as n{index}",
                self.quote_ident(&column.name)
            ));
            rows.push(format!("({}, s.n{index})", quote_literal(&column.name)));
        }
        self.unpivot(aggregates, rows, "column_name, nulls", &self.table(schema, table))
    }

    fn column_min_max(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        let mut aggregates = Vec::with_capacity(columns.len() * 2);
        let mut rows = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let ident = self.quote_ident(&column.name);
            let operand = if natively_ordered(column) {
                ident
            } else {
                format!("{ident}::text")
            };
            aggregates.push(format!("min({operand})::text as lo{index}"));
            aggregates.push(format!("max({operand})::text as hi{index}"));
            rows.push(format!(
                "({}, s.lo{index}, s.hi{index})",
                quote_literal(&column.name)
            ));
        }
        self.unpivot(
            aggregates,
            rows,
            "column_name, min_value, max_value",
            &self.table(schema, table),
        )
    }

    fn column_freq_values(
        &self,
        schema: &str,
        table: &str,
        column: &ColumnMeta,
        limit: usize,
        order: FreqOrder,
    ) -> String {
        let direction = match order {
            FreqOrder::Most => "desc",
            FreqOrder::Least => "asc",
        };
        let ident = self.quote_ident(&column.name);
        format!(
            "select {ident}::text as value, count(*) as freq \
             from {} where {ident} is not null \
             group by {ident}::text order by freq {direction}, value limit {limit}",
            self.table(schema, table)
        )
    }

    fn column_cardinalities(&self, schema: &str, table: &str, columns: &[ColumnMeta]) -> String {
        let mut aggregates = Vec::with_capacity(columns.len());
        let mut rows = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            aggregates.push(format!(
                "count(distinct {}::text) as d{index}",
                self.quote_ident(&column.name)
            ));
            rows.push(format!("({}, s.d{index})", quote_literal(&column.name)));
        }
        self.unpivot(
            aggregates,
            rows,
            "column_name, cardinality",
            &self.table(schema, table),
        )
    }

    fn record_scan(&self, schema: &str, table: &str, columns: &[String]) -> String {
        format!(
            "select {} from {}",
            self.text_columns(columns),
            self.table(schema, table)
        )
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// Types whose own ordering is meaningful; everything else is compared as text.
fn natively_ordered(column: &ColumnMeta) -> bool {
    let Some(datatype) = &column.datatype else {
        return false;
    };
    let name = datatype.name.as_str();
    matches!(
        name,
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision" | "date" | "interval"
    ) || name.starts_with("timestamp")
        || name.starts_with("time ")
}
