use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};

use dbprof_core::{Error, Result, Value};

pub fn column_names(row: &PgRow) -> Vec<String> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect()
}

/// Convert a row into canonical values. Byte strings become text here.
pub fn decode_row(row: &PgRow) -> Result<Vec<Value>> {
    row.columns()
        .iter()
        .map(|column| decode_cell(row, column.ordinal(), column.type_info().name()))
        .collect()
}

fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Value> {
    let decoded = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map(|value| value.map_or(Value::Null, Value::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|value| value.map_or(Value::Null, |v| Value::Int(i64::from(v)))),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|value| value.map_or(Value::Null, |v| Value::Int(i64::from(v)))),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map(|value| value.map_or(Value::Null, Value::Int)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|value| value.map_or(Value::Null, |v| Value::Float(f64::from(v)))),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map(|value| value.map_or(Value::Null, Value::Float)),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .map(|value| value.map_or(Value::Null, |bytes| Value::from_utf8_lossy(&bytes))),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "UNKNOWN" => row
            .try_get::<Option<String>, _>(index)
            .map(|value| value.map_or(Value::Null, Value::Text)),
        other => {
            return Err(Error::Internal(format!(
                "cannot decode column {index} of type {other}; cast it to text"
            )));
        }
    };

    decoded.map_err(|err| Error::Internal(format!("decoding column {index}: {err}")))
}
