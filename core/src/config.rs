//! Explicit run configuration. Nothing in the core reads process globals;
//! every operation is handed the pieces of this struct it needs.

use crate::{
    error::{ReconError, ReconResult},
    filter::FilterRule,
    store::is_plain_name,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Conflict key for upserts; identifiers live here.
    pub key_column: String,
    pub date_column: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: "all_upi_ids".into(),
            key_column: "Upi_vpa".into(),
            date_column: "Inserted_date".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub initial_chunk_size: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Drop identifiers the store already has before writing.
    pub skip_existing: bool,
    /// Collapse duplicate identifiers in the input, keeping the latest.
    pub dedupe: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            initial_chunk_size: 5000,
            max_retries: 3,
            backoff_base_ms: 1000,
            skip_existing: true,
            dedupe: true,
        }
    }
}

impl ImportConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    /// Chunked `key IN (...)` reads. Assumes the table holds normalized
    /// keys; legacy rows spelled differently are not found.
    #[default]
    Filtered,
    /// Page through the whole table and normalize client-side.
    FullScan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub chunk_size: usize,
    pub page_size: usize,
    pub strategy: LookupStrategy,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            page_size: 1000,
            strategy: LookupStrategy::Filtered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 10_000,
        }
    }
}

/// Groups operators by substrings of their name, e.g. "INT Neha" → Intern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorClass {
    pub label: String,
    pub contains: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl OperatorClass {
    pub fn new(label: &str, contains: &[&str], excludes: &[&str]) -> Self {
        Self {
            label: label.into(),
            contains: contains.iter().map(|s| s.to_string()).collect(),
            excludes: excludes.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, operator: &str) -> bool {
        let op = operator.to_lowercase();
        let hit = |needle: &String| op.contains(&needle.to_lowercase());
        self.contains.iter().any(hit) && !self.excludes.iter().any(hit)
    }
}

pub fn default_operator_classes() -> Vec<OperatorClass> {
    vec![
        OperatorClass::new("Freelancer", &["freelancer"], &[]),
        OperatorClass::new("Intern", &["int"], &["icuser"]),
        OperatorClass::new("Employee", &["emp"], &["icuser"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub table: TableConfig,
    pub import: ImportConfig,
    pub lookup: LookupConfig,
    pub store: StoreConfig,
    pub filters: Vec<FilterRule>,
    pub operator_column: String,
    pub operator_classes: Vec<OperatorClass>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            table: TableConfig::default(),
            import: ImportConfig::default(),
            lookup: LookupConfig::default(),
            store: StoreConfig::default(),
            filters: Vec::new(),
            operator_column: "Input_user".into(),
            operator_classes: default_operator_classes(),
        }
    }
}

impl ReconConfig {
    /// Load a JSON config file. Missing sections take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        let cfg: ReconConfig =
            serde_json::from_str(&content).with_context(|| format!("Cannot parse {path}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Small sizes and no back-off, for unit tests.
    pub fn default_test() -> Self {
        Self {
            import: ImportConfig {
                initial_chunk_size: 4,
                max_retries: 3,
                backoff_base_ms: 0,
                skip_existing: false,
                dedupe: true,
            },
            lookup: LookupConfig {
                chunk_size: 3,
                page_size: 2,
                strategy: LookupStrategy::Filtered,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ReconResult<()> {
        for name in [&self.table.name, &self.table.key_column, &self.table.date_column] {
            if !is_plain_name(name) {
                return Err(ReconError::InvalidName { name: name.clone() });
            }
        }
        if self.table.key_column == self.table.date_column {
            return Err(invalid("key_column and date_column must differ"));
        }
        if [&self.table.key_column, &self.table.date_column]
            .iter()
            .any(|c| c.eq_ignore_ascii_case("attributes"))
        {
            return Err(invalid("'attributes' is reserved for the attribute column"));
        }
        for size in [
            self.import.initial_chunk_size,
            self.lookup.chunk_size,
            self.lookup.page_size,
        ] {
            crate::chunker::check_chunk_size(size)?;
        }
        if self.operator_column.trim().is_empty() {
            return Err(invalid("operator_column must not be empty"));
        }
        if let Some(c) = self.operator_classes.iter().find(|c| c.contains.is_empty()) {
            return Err(invalid(&format!(
                "operator class '{}' has no match patterns",
                c.label
            )));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ReconError {
    ReconError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ReconConfig::default().validate().unwrap();
        ReconConfig::default_test().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ReconConfig = serde_json::from_str(
            r#"{
                "table": { "name": "all_bank_acc", "key_column": "Bank_account_number",
                           "date_column": "Inserted_date" },
                "import": { "initial_chunk_size": 250 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.table.name, "all_bank_acc");
        assert_eq!(cfg.import.initial_chunk_size, 250);
        assert_eq!(cfg.import.max_retries, 3);
        assert_eq!(cfg.lookup.chunk_size, 3000);
        assert_eq!(cfg.operator_classes.len(), 3);
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_names_and_sizes_are_rejected() {
        let mut cfg = ReconConfig::default();
        cfg.table.name = "upi; DROP TABLE x".into();
        assert!(matches!(cfg.validate(), Err(ReconError::InvalidName { .. })));

        let mut cfg = ReconConfig::default();
        cfg.lookup.chunk_size = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ReconError::InvalidChunkSize { size: 0 })
        ));

        let mut cfg = ReconConfig::default();
        cfg.table.date_column = cfg.table.key_column.clone();
        assert!(matches!(cfg.validate(), Err(ReconError::InvalidConfig { .. })));
    }

    #[test]
    fn operator_classes_match_case_insensitively() {
        let classes = default_operator_classes();
        let label = |op: &str| {
            classes
                .iter()
                .find(|c| c.matches(op))
                .map(|c| c.label.as_str())
        };
        assert_eq!(label("INT Neha Baghel"), Some("Intern"));
        assert_eq!(label("Emp Manoj Kumar"), Some("Employee"));
        assert_eq!(label("freelancer_07"), Some("Freelancer"));
        assert_eq!(label("INT icuser 3"), None);
        assert_eq!(label("automated"), None);
    }
}
