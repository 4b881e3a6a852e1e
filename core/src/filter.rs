//! Rule-driven row selection applied before extraction.

use crate::types::RawRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

impl FilterRule {
    pub fn new(column: &str, op: FilterOp, values: &[&str]) -> Self {
        Self {
            column: column.into(),
            op,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Cells and values compare trimmed and lower-cased. A missing cell
    /// compares as the empty string; [`apply_filters`] drops rules whose
    /// column is absent from every row before calling this.
    pub fn matches(&self, row: &RawRecord) -> bool {
        let cell = row.get(&self.column).unwrap_or("").to_lowercase();
        let mut values = self
            .values
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty());

        match self.op {
            FilterOp::Equals | FilterOp::In => values.any(|v| v == cell),
            FilterOp::NotEquals | FilterOp::NotIn => !values.any(|v| v == cell),
            FilterOp::Contains => values.any(|v| cell.contains(&v)),
            FilterOp::NotContains => !values.any(|v| cell.contains(&v)),
        }
    }
}

/// Keep rows that satisfy every rule, in input order. A rule naming a
/// column that no row has is skipped with a warning.
pub fn apply_filters(rows: Vec<RawRecord>, rules: &[FilterRule]) -> Vec<RawRecord> {
    let active: Vec<&FilterRule> = rules
        .iter()
        .filter(|rule| {
            let present = rows.iter().any(|row| row.columns().any(|c| c == rule.column));
            if !present {
                log::warn!("filters: column '{}' not found, skipping rule", rule.column);
            }
            present
        })
        .collect();
    if active.is_empty() {
        return rows;
    }
    let before = rows.len();
    let kept: Vec<RawRecord> = rows
        .into_iter()
        .filter(|row| active.iter().all(|r| r.matches(row)))
        .collect();
    log::debug!("filters: kept {} of {before} rows", kept.len());
    kept
}
