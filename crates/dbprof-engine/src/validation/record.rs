use std::time::Duration;

use tracing::{error, info};

use dbprof_core::{Result, RuleScope, RuleSet, TableMeta};

use crate::driver::{Cursor, Driver};
use crate::profiler::Profiler;
use crate::validation::validator::{RecordValidator, RuleValidator};

/// Drain `cursor` through `validator`, at most `fetch_size` rows per fetch.
///
/// Returns `(total_count, failed_count)`. Every row is checked; a failing
/// row never stops the scan. The cursor is left open for the caller to close.
pub async fn scan_records<V>(
    cursor: &mut (dyn Cursor + '_),
    validator: &mut V,
    fetch_size: usize,
) -> Result<(u64, u64)>
where
    V: RecordValidator + ?Sized,
{
    let field_names = cursor.column_names().to_vec();
    let mut total = 0;
    let mut failed = 0;

    loop {
        let batch = cursor.fetch_many(fetch_size).await?;
        if batch.is_empty() {
            break;
        }
        for row in &batch {
            if !validator.validate_record(&field_names, row) {
                failed += 1;
            }
            total += 1;
        }
    }

    Ok((total, failed))
}

impl<D: Driver> Profiler<D> {
    /// Row-level pass: stream the whole table through the record rules.
    pub(crate) async fn run_record_validation(
        &mut self,
        meta: &mut TableMeta,
        rules: &RuleSet,
        skip: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        info!(event = "record_validation_started");
        if skip {
            info!(event = "record_validation_skipped", reason = "requested");
            return Ok(());
        }
        if !rules.has_scope(RuleScope::Record) {
            info!(event = "record_validation_skipped", reason = "no_record_rules");
            return Ok(());
        }

        let mut validator = RuleValidator::new(rules, &meta.column_names)?;
        let sql = self
            .dialect
            .record_scan(&meta.schema_name, &meta.table_name, &meta.column_names);
        let fetch_size = self.config.fetch_size;

        self.connect().await?;
        let mut cursor = self.driver.open_cursor(&sql, timeout).await.map_err(|err| {
            error!(event = "record_validation_failed", query = %sql, error = %err);
            err
        })?;
        let scanned = scan_records(cursor.as_mut(), &mut validator, fetch_size).await;
        let closed = cursor.close().await;
        drop(cursor);

        let (total, failed) = scanned.map_err(|err| {
            error!(event = "record_validation_failed", query = %sql, error = %err);
            err
        })?;
        closed?;

        info!(event = "record_validation_finished", total, failed);
        validator.apply_findings(meta);
        Ok(())
    }
}
