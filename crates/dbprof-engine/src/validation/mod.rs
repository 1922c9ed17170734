//! Record-level and post-scan validation.

mod postscan;
mod record;
mod validator;

pub use record::scan_records;
pub use validator::{Findings, RecordValidator, RuleValidator, SqlCheck};
