use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest result a single statement may materialize.
pub const MAX_RESULT_ROWS: usize = 10_000;

/// Options that control which profiling steps run.
///
/// Every `Profiler` owns its own copy; nothing here is process-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub profile_row_count: bool,
    pub profile_nulls: bool,
    pub profile_min_max: bool,
    /// Number of most/least frequent values per column; 0 disables them.
    pub num_freq_values: usize,
    pub profile_cardinality: bool,
    pub profile_sample_rows: bool,
    pub sample_rows_limit: usize,
    /// Tables with more rows than this get no column statistics.
    pub column_profiling_threshold: u64,
    pub skip_table_profiling: bool,
    pub skip_column_profiling: bool,
    /// How many tables a caller may profile at once, each on its own
    /// connection. A single table is never profiled in parallel.
    pub parallel_degree: usize,
    /// Rows requested per cursor fetch during record validation.
    pub fetch_size: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            profile_row_count: true,
            profile_nulls: true,
            profile_min_max: true,
            num_freq_values: 10,
            profile_cardinality: true,
            profile_sample_rows: true,
            sample_rows_limit: 10,
            column_profiling_threshold: 100_000_000,
            skip_table_profiling: false,
            skip_column_profiling: false,
            parallel_degree: 0,
            fetch_size: 500_000,
        }
    }
}

impl ProfilerConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ProfilerConfig =
            toml::from_str(content).map_err(|err| Error::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::InvalidConfig(format!("reading {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(Error::InvalidConfig(
                "fetch_size must be greater than zero".to_string(),
            ));
        }
        if self.profile_sample_rows && self.sample_rows_limit == 0 {
            return Err(Error::InvalidConfig(
                "sample_rows_limit must be greater than zero when sample rows are enabled"
                    .to_string(),
            ));
        }
        self.check_result_rows(MAX_RESULT_ROWS)
    }

    /// Reject settings whose queries would return more than `max_rows` rows.
    pub fn check_result_rows(&self, max_rows: usize) -> Result<()> {
        if self.profile_sample_rows && self.sample_rows_limit > max_rows {
            return Err(Error::InvalidConfig(format!(
                "sample_rows_limit {} exceeds the result row cap {max_rows}",
                self.sample_rows_limit
            )));
        }
        if self.num_freq_values > max_rows {
            return Err(Error::InvalidConfig(format!(
                "num_freq_values {} exceeds the result row cap {max_rows}",
                self.num_freq_values
            )));
        }
        Ok(())
    }

    /// Effective concurrency for table iteration.
    pub fn table_concurrency(&self) -> usize {
        self.parallel_degree.max(1)
    }
}
