//! The remote-store capability the core depends on.
//!
//! RULE: the reconciler and importer only ever talk to a `RemoteStore`.
//! Concrete backends (SQLite, in-memory, fault injection) live behind it
//! and own their connection handling and timeouts.

use crate::{
    error::StoreError,
    types::{Identifier, Record},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

mod fault;
mod memory;
mod sqlite;

pub use fault::{FaultInjectingStore, FaultPlan};
pub use memory::{MemoryStore, StoreStats};
pub use sqlite::{ImportRunRow, SqliteStore};

/// Which rows count as "known" when answering existence questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "view", content = "cutoff", rename_all = "snake_case")]
pub enum ExistenceView {
    /// Everything currently in the table.
    #[default]
    Current,
    /// Only rows whose insertion date is on or before the cutoff. Rows
    /// without a date are not known under this view.
    KnownOnOrBefore(NaiveDate),
}

impl ExistenceView {
    /// Whether a stored row with `inserted` date is visible in this view.
    pub fn admits(&self, inserted: Option<NaiveDate>) -> bool {
        match self {
            Self::Current => true,
            Self::KnownOnOrBefore(cutoff) => inserted.is_some_and(|d| d <= *cutoff),
        }
    }
}

/// A key-addressable table reachable only in bounded-size requests.
///
/// Implementations must not partially apply an upsert: a batch either
/// commits whole or returns an error.
pub trait RemoteStore {
    /// The column the table is keyed on (the only valid conflict key).
    fn key_column(&self) -> &str;

    /// Filtered batch read: the subset of `keys` already present under
    /// `view`. Callers bound `keys` to a safe request size.
    fn lookup_existing(
        &self,
        keys: &[Identifier],
        view: ExistenceView,
    ) -> Result<HashSet<Identifier>, StoreError>;

    /// Insert new rows and update existing ones matched on `conflict_key`.
    /// Returns the number of rows written.
    fn upsert(&self, records: &[Record], conflict_key: &str) -> Result<usize, StoreError>;

    /// Paged full-scan read of stored key values, exactly as stored.
    /// A page shorter than `limit` is the last one.
    fn scan_keys(
        &self,
        view: ExistenceView,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for &S {
    fn key_column(&self) -> &str {
        (**self).key_column()
    }

    fn lookup_existing(
        &self,
        keys: &[Identifier],
        view: ExistenceView,
    ) -> Result<HashSet<Identifier>, StoreError> {
        (**self).lookup_existing(keys, view)
    }

    fn upsert(&self, records: &[Record], conflict_key: &str) -> Result<usize, StoreError> {
        (**self).upsert(records, conflict_key)
    }

    fn scan_keys(
        &self,
        view: ExistenceView,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        (**self).scan_keys(view, offset, limit)
    }
}

/// Reject table/column names that cannot be safely quoted into SQL.
pub fn is_plain_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
