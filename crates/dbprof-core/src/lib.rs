//! Core contracts and helpers for dbprof.
//!
//! This crate defines the table profile model, the error taxonomy, the
//! profiler configuration, validation rules, and metadata migration shared
//! by the engine and the CLI.

pub mod config;
pub mod error;
pub mod meta;
pub mod migrate;
pub mod redaction;
pub mod rules;
pub mod value;

pub use config::{MAX_RESULT_ROWS, ProfilerConfig};
pub use error::{Error, Result};
pub use meta::{ColumnMeta, DataType, FreqValue, RowCountSource, SampleRows, TableMeta};
pub use migrate::migrate_table_meta;
pub use redaction::redact_connection_string;
pub use rules::{Comparison, RuleKind, RuleScope, RuleSet, Statistic, ValidationRule};
pub use value::Value;

/// Current contract version for profile JSON artifacts.
pub const PROFILE_VERSION: &str = "0.1";
