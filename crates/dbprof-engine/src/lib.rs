//! Table profiling engine.
//!
//! The [`Profiler`] drives one table at a time through discovery, column
//! statistics and record validation, talking to the database only through
//! the [`Driver`] and [`Dialect`] traits.

pub mod dialect;
pub mod driver;
pub mod postgres;
pub mod profiler;
mod stats;
pub mod validation;

pub use dialect::{Dialect, FreqOrder};
pub use driver::{Cursor, DEFAULT_MAX_ROWS, Driver, QueryResult};
pub use postgres::{PostgresDialect, PostgresDriver, postgres_profiler};
pub use profiler::{Profiler, RunOptions};
pub use validation::{Findings, RecordValidator, RuleValidator, scan_records};

pub use dbprof_core::{ProfilerConfig, RuleSet, TableMeta};
