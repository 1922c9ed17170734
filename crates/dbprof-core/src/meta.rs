use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// One profiling snapshot of a table.
///
/// Serialized as-is, this is the output mapping of a profiling run. Optional
/// fields that a run did not reach are omitted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableMeta {
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    /// Creation time of this snapshot.
    pub timestamp: DateTime<Utc>,
    /// Column names in discovery order.
    pub column_names: Vec<String>,
    /// One entry per `column_names` item, same order.
    pub columns: Vec<ColumnMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count_source: Option<RowCountSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rows: Option<SampleRows>,

    // Human annotations, carried across runs by migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name_nls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// How the row count of a snapshot was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RowCountSource {
    /// `count(*)` over the table.
    Exact,
    /// The database's own table-size estimate.
    Statistics,
}

/// Header plus a handful of rows captured from the table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SampleRows {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Reported column type: type name plus optional length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct DataType {
    pub name: String,
    pub length: Option<i64>,
}

/// A value together with its number of occurrences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct FreqValue {
    pub value: String,
    pub count: u64,
}

/// Profile of a single column.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_freq_values: Option<Vec<FreqValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub least_freq_values: Option<Vec<FreqValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<u64>,
    /// Rule name to invalid-record count.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation: BTreeMap<String, u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name_nls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Foreign-key reference noted by a human (e.g. `orders.customer_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk: Option<String>,
    /// Foreign-key target noted by a human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fk_ref: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when any statistical field has been populated.
    pub fn has_statistics(&self) -> bool {
        self.nulls.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || self.most_freq_values.is_some()
            || self.least_freq_values.is_some()
            || self.cardinality.is_some()
    }
}

impl TableMeta {
    /// Build an empty snapshot with one `ColumnMeta` per discovered column.
    pub fn new(
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        column_names: Vec<String>,
    ) -> Result<Self> {
        let schema_name = schema_name.into();
        let table_name = table_name.into();

        if column_names.is_empty() {
            return Err(Error::Internal(format!(
                "no columns discovered for {schema_name}.{table_name}"
            )));
        }

        let mut seen = BTreeSet::new();
        for name in &column_names {
            if !seen.insert(name.as_str()) {
                return Err(Error::Internal(format!(
                    "duplicate column name discovered: {schema_name}.{table_name}.{name}"
                )));
            }
        }

        let columns = column_names.iter().map(ColumnMeta::new).collect();

        Ok(Self {
            database_name: database_name.into(),
            schema_name,
            table_name,
            timestamp: Utc::now(),
            column_names,
            columns,
            row_count: None,
            row_count_source: None,
            sample_rows: None,
            table_name_nls: None,
            comment: None,
            tags: Vec::new(),
            owner: None,
        })
    }

    /// `schema.table`, used in log lines and artifact names.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnMeta> {
        self.columns.iter_mut().find(|column| column.name == name)
    }

    /// Record the row count. A snapshot accepts exactly one row count.
    pub fn set_row_count(&mut self, count: u64, source: RowCountSource) -> Result<()> {
        if let Some(existing) = self.row_count_source {
            return Err(Error::Internal(format!(
                "row count of {} already set ({existing:?})",
                self.qualified_name()
            )));
        }
        self.row_count = Some(count);
        self.row_count_source = Some(source);
        Ok(())
    }

    pub fn has_column_statistics(&self) -> bool {
        self.columns.iter().any(ColumnMeta::has_statistics)
    }
}
