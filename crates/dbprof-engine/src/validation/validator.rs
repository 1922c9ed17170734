use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::debug;

use dbprof_core::{
    Comparison, Error, Result, RuleKind, RuleSet, Statistic, TableMeta, Value,
};

/// Column name to rule name to invalid-record count.
pub type Findings = BTreeMap<String, BTreeMap<String, u64>>;

/// Row-level predicate applied while streaming a table.
pub trait RecordValidator: Send {
    /// Returns `false` when any rule rejects the row.
    fn validate_record(&mut self, field_names: &[String], row: &[Value]) -> bool;
}

/// A post-scan rule that needs a query against the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCheck {
    pub rule: String,
    pub query: String,
}

enum RecordCheck {
    NotNull,
    Regexp(Regex),
    Range { min: Option<f64>, max: Option<f64> },
}

impl RecordCheck {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            RecordCheck::NotNull => !value.is_null(),
            RecordCheck::Regexp(pattern) => match value.to_text() {
                Some(text) => pattern.is_match(&text),
                None => true,
            },
            RecordCheck::Range { min, max } => {
                if value.is_null() {
                    return true;
                }
                let Some(number) = value.as_f64() else {
                    return false;
                };
                min.is_none_or(|low| number >= low) && max.is_none_or(|high| number <= high)
            }
        }
    }
}

struct RecordRule {
    name: String,
    column: String,
    check: RecordCheck,
    invalid: u64,
}

enum PostScanCheck {
    Stat {
        statistic: Statistic,
        op: Comparison,
        value: f64,
    },
    Sql {
        query: String,
    },
}

struct PostScanRule {
    name: String,
    column: String,
    check: PostScanCheck,
    invalid: u64,
}

/// Validator built from a [`RuleSet`] for one table.
pub struct RuleValidator {
    record_rules: Vec<RecordRule>,
    postscan_rules: Vec<PostScanRule>,
    // Field positions of each record rule, resolved on the first row.
    positions: Option<Vec<Option<usize>>>,
}

impl RuleValidator {
    /// Bind `rules` to a table. Rules naming an unknown column are rejected.
    pub fn new(rules: &RuleSet, column_names: &[String]) -> Result<Self> {
        let known: BTreeSet<&str> = column_names.iter().map(String::as_str).collect();
        let mut record_rules = Vec::new();
        let mut postscan_rules = Vec::new();

        for rule in rules.iter() {
            let column = rule.kind.column().to_string();
            if !known.contains(column.as_str()) {
                return Err(Error::InvalidRule(format!(
                    "rule {} targets unknown column {column}",
                    rule.name
                )));
            }

            let name = rule.name.clone();
            match &rule.kind {
                RuleKind::NotNull { .. } => record_rules.push(RecordRule {
                    name,
                    column,
                    check: RecordCheck::NotNull,
                    invalid: 0,
                }),
                RuleKind::Regexp { pattern, .. } => {
                    let pattern = Regex::new(pattern)
                        .map_err(|err| Error::InvalidRule(format!("rule {name}: {err}")))?;
                    record_rules.push(RecordRule {
                        name,
                        column,
                        check: RecordCheck::Regexp(pattern),
                        invalid: 0,
                    });
                }
                RuleKind::Range { min, max, .. } => record_rules.push(RecordRule {
                    name,
                    column,
                    check: RecordCheck::Range {
                        min: *min,
                        max: *max,
                    },
                    invalid: 0,
                }),
                RuleKind::ColumnStat {
                    statistic,
                    op,
                    value,
                    ..
                } => postscan_rules.push(PostScanRule {
                    name,
                    column,
                    check: PostScanCheck::Stat {
                        statistic: *statistic,
                        op: *op,
                        value: *value,
                    },
                    invalid: 0,
                }),
                RuleKind::Sql { query, .. } => postscan_rules.push(PostScanRule {
                    name,
                    column,
                    check: PostScanCheck::Sql {
                        query: query.clone(),
                    },
                    invalid: 0,
                }),
            }
        }

        Ok(Self {
            record_rules,
            postscan_rules,
            positions: None,
        })
    }

    /// Evaluate `column_stat` rules against computed statistics.
    ///
    /// Returns `(validated, failed)`. Rules whose statistic was not computed
    /// are left out of both counts.
    pub fn validate_table(&mut self, meta: &TableMeta) -> (u64, u64) {
        let mut validated = 0;
        let mut failed = 0;

        for rule in &mut self.postscan_rules {
            let PostScanCheck::Stat {
                statistic,
                op,
                value,
            } = &rule.check
            else {
                continue;
            };

            let Some(observed) = observed_statistic(meta, &rule.column, *statistic) else {
                debug!(event = "rule_not_evaluated", rule = %rule.name, statistic = ?statistic);
                continue;
            };

            validated += 1;
            if !op.holds(observed, *value) {
                rule.invalid = 1;
                failed += 1;
            }
        }

        (validated, failed)
    }

    /// Query templates of the `sql` rules, in rule order.
    pub fn sql_checks(&self) -> Vec<SqlCheck> {
        self.postscan_rules
            .iter()
            .filter_map(|rule| match &rule.check {
                PostScanCheck::Sql { query } => Some(SqlCheck {
                    rule: rule.name.clone(),
                    query: query.clone(),
                }),
                PostScanCheck::Stat { .. } => None,
            })
            .collect()
    }

    /// Record the invalid-record count returned by an `sql` rule's query.
    pub fn record_sql_result(&mut self, rule: &str, invalid: u64) {
        if let Some(rule) = self.postscan_rules.iter_mut().find(|item| item.name == rule) {
            rule.invalid = invalid;
        }
    }

    /// Non-zero invalid counts per column and rule.
    pub fn findings(&self) -> Findings {
        let record = self
            .record_rules
            .iter()
            .map(|rule| (&rule.column, &rule.name, rule.invalid));
        let postscan = self
            .postscan_rules
            .iter()
            .map(|rule| (&rule.column, &rule.name, rule.invalid));

        let mut findings = Findings::new();
        for (column, rule, invalid) in record.chain(postscan) {
            if invalid > 0 {
                findings
                    .entry(column.clone())
                    .or_default()
                    .insert(rule.clone(), invalid);
            }
        }
        findings
    }

    /// Merge findings into the columns of `meta`.
    pub fn apply_findings(&self, meta: &mut TableMeta) {
        for (column, rules) in self.findings() {
            if let Some(column) = meta.column_mut(&column) {
                column.validation.extend(rules);
            }
        }
    }
}

impl RecordValidator for RuleValidator {
    fn validate_record(&mut self, field_names: &[String], row: &[Value]) -> bool {
        if self.positions.is_none() {
            self.positions = Some(
                self.record_rules
                    .iter()
                    .map(|rule| field_names.iter().position(|field| *field == rule.column))
                    .collect(),
            );
        }
        let positions = self.positions.as_deref().unwrap_or_default();
        let mut valid = true;

        for (rule, position) in self.record_rules.iter_mut().zip(positions) {
            let accepted = (*position)
                .and_then(|index| row.get(index))
                .is_some_and(|value| rule.check.accepts(value));
            if !accepted {
                rule.invalid += 1;
                valid = false;
            }
        }

        valid
    }
}

fn observed_statistic(meta: &TableMeta, column: &str, statistic: Statistic) -> Option<f64> {
    if statistic == Statistic::RowCount {
        return meta.row_count.map(|rows| rows as f64);
    }

    let column = meta.column(column)?;
    match statistic {
        Statistic::Nulls => column.nulls.map(|nulls| nulls as f64),
        Statistic::Cardinality => column.cardinality.map(|count| count as f64),
        Statistic::Min => column.min.as_deref().and_then(|text| text.trim().parse().ok()),
        Statistic::Max => column.max.as_deref().and_then(|text| text.trim().parse().ok()),
        Statistic::RowCount => None,
    }
}
