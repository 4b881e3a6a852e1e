//! Shared value types: identifiers, raw input rows, validated records.

use crate::{
    error::{ReconError, ReconResult},
    normalizer::normalize,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A canonical payment handle or account number.
///
/// Only constructible through normalization, so two raw spellings that
/// normalize identically compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize `raw`; `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let clean = normalize(raw);
        if clean.is_empty() {
            None
        } else {
            Some(Self(clean))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A de-duplicated set of identifiers from one uploaded batch.
pub type CandidateSet = HashSet<Identifier>;

/// Build a candidate set from raw values, dropping values that normalize
/// to nothing.
pub fn candidate_set<'a, I>(raw: I) -> CandidateSet
where
    I: IntoIterator<Item = &'a str>,
{
    raw.into_iter().filter_map(Identifier::parse).collect()
}

/// Spellings spreadsheet exports use for an empty cell.
const MISSING_SENTINELS: [&str; 4] = ["na", "nan", "none", "null"];

/// One input row as handed over by the file-parsing layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, Option<String>>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.set(column, Some(value.to_string()));
        self
    }

    pub fn set(&mut self, column: &str, value: Option<String>) {
        self.fields.insert(column.trim().to_string(), value);
    }

    /// The trimmed value of `column`, or `None` if absent, blank, or a
    /// missing-value sentinel such as `NA`.
    pub fn get(&self, column: &str) -> Option<&str> {
        let value = self.fields.get(column)?.as_deref()?.trim();
        if value.is_empty() || MISSING_SENTINELS.iter().any(|s| value.eq_ignore_ascii_case(s)) {
            None
        } else {
            Some(value)
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Option<String>)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        let mut raw = RawRecord::new();
        for (column, value) in iter {
            raw.set(&column, value);
        }
        raw
    }
}

/// A validated row ready for the store: normalized key, optional
/// insertion date, remaining non-missing columns as attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Identifier,
    pub inserted_date: Option<NaiveDate>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Record {
    pub fn new(key: Identifier, inserted_date: Option<NaiveDate>) -> Self {
        Self {
            key,
            inserted_date,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Validate a raw row. The key column must be present and non-empty
    /// after normalization; an unparseable date is dropped, not an error.
    pub fn from_raw(raw: &RawRecord, key_column: &str, date_column: &str) -> ReconResult<Self> {
        let key = raw
            .get(key_column)
            .and_then(Identifier::parse)
            .ok_or_else(|| ReconError::MissingField {
                field: key_column.to_string(),
            })?;
        let inserted_date = raw.get(date_column).and_then(parse_date);

        let attributes = raw
            .columns()
            .filter(|c| *c != key_column && *c != date_column)
            .filter_map(|c| raw.get(c).map(|v| (c.to_string(), v.to_string())))
            .collect();

        Ok(Self {
            key,
            inserted_date,
            attributes,
        })
    }
}

/// Result of validating a batch of raw rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub rejected: usize,
}

/// Validate every row, keeping the good ones and counting the rest.
pub fn extract_records(rows: &[RawRecord], key_column: &str, date_column: &str) -> Extraction {
    let mut out = Extraction::default();
    for raw in rows {
        match Record::from_raw(raw, key_column, date_column) {
            Ok(r) => out.records.push(r),
            Err(_) => out.rejected += 1,
        }
    }
    if out.rejected > 0 {
        log::info!(
            "extract: {} rows accepted, {} rejected for missing '{key_column}'",
            out.records.len(),
            out.rejected
        );
    }
    out
}

/// Parse the date formats seen in exported sheets and SQL dumps.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
            return Some(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(v)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Canonical text form used when dates are persisted.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
