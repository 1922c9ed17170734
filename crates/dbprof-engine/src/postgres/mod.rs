use dbprof_core::{ProfilerConfig, Result};

use crate::profiler::Profiler;

mod decode;
mod dialect;
mod driver;

pub use dialect::PostgresDialect;
pub use driver::{PostgresCursor, PostgresDriver};

/// Build a profiler for a PostgreSQL connection URL.
///
/// The connection itself is opened lazily by the first query.
pub fn postgres_profiler(url: &str, config: ProfilerConfig) -> Result<Profiler<PostgresDriver>> {
    Profiler::new(PostgresDriver::new(url)?, PostgresDialect, config)
}
