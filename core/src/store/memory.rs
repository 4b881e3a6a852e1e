//! In-process table used by tests and dry runs.

use super::{ExistenceView, RemoteStore};
use crate::{
    error::StoreError,
    types::{Identifier, Record},
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredRow {
    key: String,
    inserted_date: Option<NaiveDate>,
    attributes: BTreeMap<String, String>,
}

/// Call counters, for asserting on round-trips in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub lookup_calls: usize,
    pub lookup_sizes: Vec<usize>,
    pub upsert_sizes: Vec<usize>,
    pub scan_calls: usize,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion-ordered rows; `index` maps stored key → position.
    rows: Vec<StoredRow>,
    index: BTreeMap<String, usize>,
    stats: StoreStats,
}

pub struct MemoryStore {
    key_column: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(key_column: &str) -> Self {
        Self {
            key_column: key_column.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed with identifiers carrying an optional insertion date.
    pub fn with_keys<'a, I>(key_column: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<NaiveDate>)>,
    {
        let store = Self::new(key_column);
        for (key, date) in keys {
            store.insert_raw(key, date);
        }
        store
    }

    /// Insert a row verbatim, bypassing normalization. Models legacy rows
    /// written by other tools: filtered lookups match them only by exact
    /// spelling, the same way an `IN (...)` query would.
    pub fn insert_raw(&self, key: &str, inserted_date: Option<NaiveDate>) {
        let mut inner = self.lock();
        let lookup = key.to_string();
        if inner.index.contains_key(&lookup) {
            return;
        }
        let pos = inner.rows.len();
        inner.rows.push(StoredRow {
            key: key.to_string(),
            inserted_date,
            attributes: BTreeMap::new(),
        });
        inner.index.insert(lookup, pos);
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Identifier) -> bool {
        self.lock().index.contains_key(key.as_str())
    }

    pub fn inserted_date(&self, key: &Identifier) -> Option<NaiveDate> {
        let inner = self.lock();
        let pos = *inner.index.get(key.as_str())?;
        inner.rows[pos].inserted_date
    }

    pub fn attributes(&self, key: &Identifier) -> Option<BTreeMap<String, String>> {
        let inner = self.lock();
        let pos = *inner.index.get(key.as_str())?;
        Some(inner.rows[pos].attributes.clone())
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the map
        // itself is still consistent.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl RemoteStore for MemoryStore {
    fn key_column(&self) -> &str {
        &self.key_column
    }

    fn lookup_existing(
        &self,
        keys: &[Identifier],
        view: ExistenceView,
    ) -> Result<HashSet<Identifier>, StoreError> {
        let mut inner = self.lock();
        inner.stats.lookup_calls += 1;
        inner.stats.lookup_sizes.push(keys.len());

        Ok(keys
            .iter()
            .filter(|k| {
                inner
                    .index
                    .get(k.as_str())
                    .is_some_and(|&pos| view.admits(inner.rows[pos].inserted_date))
            })
            .cloned()
            .collect())
    }

    fn upsert(&self, records: &[Record], conflict_key: &str) -> Result<usize, StoreError> {
        if conflict_key != self.key_column {
            return Err(StoreError::Permanent(format!(
                "no unique constraint on column '{conflict_key}'"
            )));
        }
        let mut inner = self.lock();
        inner.stats.upsert_sizes.push(records.len());

        for r in records {
            let row = StoredRow {
                key: r.key.as_str().to_string(),
                inserted_date: r.inserted_date,
                attributes: r.attributes.clone(),
            };
            match inner.index.get(r.key.as_str()).copied() {
                Some(pos) => inner.rows[pos] = row,
                None => {
                    let pos = inner.rows.len();
                    inner.rows.push(row);
                    inner.index.insert(r.key.as_str().to_string(), pos);
                }
            }
        }
        Ok(records.len())
    }

    fn scan_keys(
        &self,
        view: ExistenceView,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.lock();
        inner.stats.scan_calls += 1;
        Ok(inner
            .rows
            .iter()
            .filter(|r| view.admits(r.inserted_date))
            .skip(offset)
            .take(limit)
            .map(|r| r.key.clone())
            .collect())
    }
}
