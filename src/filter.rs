//! Row selection for filtered tab state.
//!
//! Tab `base_options` are URL query pairs, of which
//! `include-filter-by-regex` and `exclude-filter-by-regex` are understood.
//! A row is kept when its name matches every include expression and none of
//! the exclude expressions.

use regex::Regex;

use crate::domain::Row;
use crate::error::{Result, TabulatorError};

const INCLUDE_KEY: &str = "include-filter-by-regex";
const EXCLUDE_KEY: &str = "exclude-filter-by-regex";

/// Decides whether a row belongs in a tab's state
pub trait RowPredicate: Send + Sync {
    fn matches(&self, row: &Row) -> bool;
}

impl<F> RowPredicate for F
where
    F: Fn(&Row) -> bool + Send + Sync,
{
    fn matches(&self, row: &Row) -> bool {
        self(row)
    }
}

/// Include/exclude regular expressions applied to row names
#[derive(Debug, Default)]
pub struct RowFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl RowFilter {
    /// Parse tab base options. Unknown keys are ignored.
    pub fn parse(base_options: &str) -> Result<Self> {
        let mut filter = Self::default();
        let options = base_options.trim_start_matches('?');
        for (key, value) in url::form_urlencoded::parse(options.as_bytes()) {
            let target = match &*key {
                INCLUDE_KEY => &mut filter.include,
                EXCLUDE_KEY => &mut filter.exclude,
                _ => continue,
            };
            let re = Regex::new(&value).map_err(|e| TabulatorError::Filter(format!("{}={}: {}", key, value, e)))?;
            target.push(re);
        }
        Ok(filter)
    }
}

impl RowPredicate for RowFilter {
    fn matches(&self, row: &Row) -> bool {
        self.include.iter().all(|re| re.is_match(&row.name)) && !self.exclude.iter().any(|re| re.is_match(&row.name))
    }
}

/// Keep the rows satisfying `predicate`, preserving their order.
pub fn filter_rows(predicate: &dyn RowPredicate, rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter().filter(|row| predicate.matches(row)).collect()
}
