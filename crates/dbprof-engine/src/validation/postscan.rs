use std::time::Duration;

use tracing::{error, info};

use dbprof_core::{Result, RuleScope, RuleSet, TableMeta};

use crate::driver::Driver;
use crate::profiler::Profiler;
use crate::validation::validator::RuleValidator;

impl<D: Driver> Profiler<D> {
    /// Post-scan pass: check rules against computed statistics, then run the
    /// ad-hoc rule queries, and patch the findings into `meta`.
    pub(crate) async fn run_postscan_validation(
        &mut self,
        meta: &mut TableMeta,
        rules: &RuleSet,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if !rules.has_scope(RuleScope::PostScan) {
            return Ok(());
        }

        let mut validator = RuleValidator::new(rules, &meta.column_names)?;

        info!(event = "statistics_validation_started");
        let (validated, failed) = validator.validate_table(meta);
        info!(event = "statistics_validation_finished", validated, failed);

        info!(event = "sql_validation_started");
        let mut validated = 0u64;
        let mut failed = 0u64;
        for check in validator.sql_checks() {
            let sql = self
                .dialect
                .render_rule_query(&check.query, &meta.schema_name, &meta.table_name);
            let invalid = match self.query(&sql, timeout).await {
                Ok(result) => result.single_count()?,
                Err(err) => {
                    error!(event = "sql_validation_failed", rule = %check.rule, error = %err);
                    return Err(err);
                }
            };
            validated += 1;
            if invalid > 0 {
                failed += 1;
            }
            validator.record_sql_result(&check.rule, invalid);
        }
        info!(event = "sql_validation_finished", validated, failed);

        validator.apply_findings(meta);
        Ok(())
    }
}
