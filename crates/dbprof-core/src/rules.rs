use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named validation rule bound to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    #[serde(flatten)]
    pub kind: RuleKind,
}

/// Closed set of rule kinds. Unknown kinds fail at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Record is invalid when the column is NULL.
    NotNull { column: String },
    /// Record is invalid when the column's text does not match `pattern`.
    Regexp { column: String, pattern: String },
    /// Record is invalid when the column is not a number within bounds.
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Compares a computed statistic against a constant after profiling.
    ColumnStat {
        column: String,
        statistic: Statistic,
        op: Comparison,
        value: f64,
    },
    /// Ad-hoc query returning the number of invalid records.
    ///
    /// `{schema}` and `{table}` are substituted before execution.
    Sql { column: String, query: String },
}

/// When a rule is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Streamed over every row of the table.
    Record,
    /// Evaluated once column statistics are known.
    PostScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Nulls,
    Min,
    Max,
    Cardinality,
    RowCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
        }
    }
}

impl RuleKind {
    pub fn column(&self) -> &str {
        match self {
            RuleKind::NotNull { column }
            | RuleKind::Regexp { column, .. }
            | RuleKind::Range { column, .. }
            | RuleKind::ColumnStat { column, .. }
            | RuleKind::Sql { column, .. } => column,
        }
    }

    pub fn scope(&self) -> RuleScope {
        match self {
            RuleKind::NotNull { .. } | RuleKind::Regexp { .. } | RuleKind::Range { .. } => {
                RuleScope::Record
            }
            RuleKind::ColumnStat { .. } | RuleKind::Sql { .. } => RuleScope::PostScan,
        }
    }
}

/// Ordered, checked collection of validation rules.
///
/// Deserializing goes through [`RuleSet::new`], so a parsed set is always
/// checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleDocument")]
pub struct RuleSet {
    rules: Vec<ValidationRule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    Bare(Vec<ValidationRule>),
    Wrapped {
        #[serde(default)]
        rules: Vec<ValidationRule>,
    },
}

impl TryFrom<RuleDocument> for RuleSet {
    type Error = Error;

    fn try_from(document: RuleDocument) -> Result<Self> {
        match document {
            RuleDocument::Bare(rules) | RuleDocument::Wrapped { rules } => Self::new(rules),
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<ValidationRule>) -> Result<Self> {
        let mut names = BTreeSet::new();
        for rule in &rules {
            check_rule(rule)?;
            if !names.insert(rule.name.as_str()) {
                return Err(Error::InvalidRule(format!(
                    "duplicate rule name: {}",
                    rule.name
                )));
            }
        }
        Ok(Self { rules })
    }

    /// Parse either a JSON array of rules or an object with a `rules` array.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|err| Error::InvalidRule(err.to_string()))
    }

    /// Parse a TOML document made of `[[rules]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::InvalidRule(err.to_string()))
    }

    /// Load rules from a `.toml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::InvalidRule(format!("reading {}: {err}", path.display())))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationRule> {
        self.rules.iter()
    }

    pub fn has_scope(&self, scope: RuleScope) -> bool {
        self.rules.iter().any(|rule| rule.kind.scope() == scope)
    }
}

fn check_rule(rule: &ValidationRule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(Error::InvalidRule("rule name must not be empty".to_string()));
    }
    if rule.kind.column().trim().is_empty() {
        return Err(Error::InvalidRule(format!(
            "rule {} does not name a column",
            rule.name
        )));
    }

    match &rule.kind {
        RuleKind::Regexp { pattern, .. } => {
            Regex::new(pattern)
                .map_err(|err| Error::InvalidRule(format!("rule {}: {err}", rule.name)))?;
        }
        RuleKind::Range { min, max, .. } => match (min, max) {
            (None, None) => {
                return Err(Error::InvalidRule(format!(
                    "rule {}: range needs min or max",
                    rule.name
                )));
            }
            (Some(low), Some(high)) if low > high => {
                return Err(Error::InvalidRule(format!(
                    "rule {}: min {low} is greater than max {high}",
                    rule.name
                )));
            }
            _ => {}
        },
        RuleKind::Sql { query, .. } if query.trim().is_empty() => {
            return Err(Error::InvalidRule(format!(
                "rule {}: query must not be empty",
                rule.name
            )));
        }
        _ => {}
    }

    Ok(())
}
