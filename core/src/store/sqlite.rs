//! SQLite adapter for `RemoteStore`.
//!
//! RULE: a connection is opened per operation and dropped on every exit
//! path. A retry after a dropped connection therefore always starts from
//! a fresh handle.

use super::{is_plain_name, ExistenceView, RemoteStore};
use crate::{
    config::{StoreConfig, TableConfig},
    error::{ReconError, ReconResult, StoreError},
    importer::ImportOutcome,
    types::{format_date, parse_date, Identifier, Record},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

pub struct SqliteStore {
    path: String,
    table: String,
    key_column: String,
    date_column: String,
    busy_timeout: Duration,
    // Keeps a shared-cache in-memory database alive between operations.
    _anchor: Option<Connection>,
}

/// One row of the `import_run` ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRunRow {
    pub run_id: String,
    pub table_name: String,
    pub started_at: String,
    pub finished_at: String,
    pub attempted: i64,
    pub inserted: i64,
    pub failed_batches: i64,
    pub retries: i64,
    pub outcome_json: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the
    /// identifier table and ledger exist.
    pub fn open(path: &str, table: &TableConfig, cfg: &StoreConfig) -> ReconResult<Self> {
        let store = Self::build(path.to_string(), table, cfg, None)?;
        store.migrate()?;
        Ok(store)
    }

    /// Open a private in-memory database (used in tests).
    pub fn in_memory(table: &TableConfig) -> ReconResult<Self> {
        let path = format!(
            "file:recon_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let anchor = Connection::open_with_flags(&path, Self::flags())?;
        let store = Self::build(path, table, &StoreConfig::default(), Some(anchor))?;
        store.migrate()?;
        Ok(store)
    }

    fn build(
        path: String,
        table: &TableConfig,
        cfg: &StoreConfig,
        anchor: Option<Connection>,
    ) -> ReconResult<Self> {
        for name in [&table.name, &table.key_column, &table.date_column] {
            if !is_plain_name(name) {
                return Err(ReconError::InvalidName { name: name.clone() });
            }
        }
        Ok(Self {
            path,
            table: table.name.clone(),
            key_column: table.key_column.clone(),
            date_column: table.date_column.clone(),
            busy_timeout: Duration::from_millis(cfg.busy_timeout_ms),
            _anchor: anchor,
        })
    }

    fn flags() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(&self.path, Self::flags())?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Apply the ledger migration and create the identifier table.
    pub fn migrate(&self) -> ReconResult<()> {
        let conn = self.connect()?;
        // WAL only matters for real files; memory databases ignore it.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::warn!("sqlite: could not enable WAL on {}: {e}", self.path);
        }
        conn.execute_batch(include_str!("../../../migrations/001_import_ledger.sql"))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{t}\" (
                \"{k}\"     TEXT PRIMARY KEY NOT NULL,
                \"{d}\"     TEXT,
                attributes  TEXT NOT NULL DEFAULT '{{}}'
            );
            CREATE INDEX IF NOT EXISTS \"{t}_{d}_idx\" ON \"{t}\" (\"{d}\");",
            t = self.table,
            k = self.key_column,
            d = self.date_column,
        ))?;
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn count(&self) -> ReconResult<i64> {
        let conn = self.connect()?;
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }

    /// Fetch one stored row by its normalized key.
    pub fn get(&self, key: &Identifier) -> ReconResult<Option<Record>> {
        let conn = self.connect()?;
        let row: Option<(Option<String>, String)> = conn
            .query_row(
                &format!(
                    "SELECT \"{d}\", attributes FROM \"{t}\" WHERE \"{k}\" = ?1",
                    t = self.table,
                    k = self.key_column,
                    d = self.date_column,
                ),
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((date, attrs)) => {
                let attributes: BTreeMap<String, String> = serde_json::from_str(&attrs)?;
                Ok(Some(Record {
                    key: key.clone(),
                    inserted_date: date.as_deref().and_then(parse_date),
                    attributes,
                }))
            }
        }
    }

    /// Insert a key exactly as given, bypassing normalization. Stands in
    /// for rows written by other tools.
    pub fn insert_raw(&self, key: &str, date: Option<chrono::NaiveDate>) -> ReconResult<()> {
        let conn = self.connect()?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO \"{t}\" (\"{k}\", \"{d}\") VALUES (?1, ?2)",
                t = self.table,
                k = self.key_column,
                d = self.date_column,
            ),
            params![key, date.map(format_date)],
        )?;
        Ok(())
    }

    // ── Import-run ledger ──────────────────────────────────────

    pub fn record_import_run(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: &ImportOutcome,
    ) -> ReconResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO import_run
             (run_id, table_name, started_at, finished_at, attempted,
              inserted, failed_batches, retries, outcome_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                self.table,
                started_at.to_rfc3339(),
                finished_at.to_rfc3339(),
                outcome.attempted as i64,
                outcome.inserted as i64,
                outcome.errors.len() as i64,
                outcome.retries as i64,
                serde_json::to_string(outcome)?,
            ],
        )?;
        Ok(())
    }

    pub fn recent_import_runs(&self, limit: usize) -> ReconResult<Vec<ImportRunRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, table_name, started_at, finished_at, attempted,
                    inserted, failed_batches, retries, outcome_json
             FROM import_run
             ORDER BY started_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ImportRunRow {
                    run_id: row.get(0)?,
                    table_name: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    attempted: row.get(4)?,
                    inserted: row.get(5)?,
                    failed_batches: row.get(6)?,
                    retries: row.get(7)?,
                    outcome_json: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn view_clause(&self, view: ExistenceView, first_param: usize) -> (String, Option<String>) {
        match view {
            ExistenceView::Current => (String::new(), None),
            ExistenceView::KnownOnOrBefore(cutoff) => (
                format!(
                    " AND \"{d}\" IS NOT NULL AND \"{d}\" <= ?{first_param}",
                    d = self.date_column
                ),
                Some(format_date(cutoff)),
            ),
        }
    }
}

impl RemoteStore for SqliteStore {
    fn key_column(&self) -> &str {
        &self.key_column
    }

    fn lookup_existing(
        &self,
        keys: &[Identifier],
        view: ExistenceView,
    ) -> Result<HashSet<Identifier>, StoreError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = (1..=keys.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let (view_sql, cutoff) = self.view_clause(view, keys.len() + 1);
        let sql = format!(
            "SELECT \"{k}\" FROM \"{t}\" WHERE \"{k}\" IN ({placeholders}){view_sql}",
            t = self.table,
            k = self.key_column,
        );

        let mut args: Vec<&str> = keys.iter().map(Identifier::as_str).collect();
        if let Some(c) = cutoff.as_deref() {
            args.push(c);
        }

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        // Only byte-equal matches of already-normalized keys come back, so
        // this parse is a type conversion. Rows stored un-normalized are
        // never matched here; see `LookupStrategy::FullScan`.
        Ok(found.iter().filter_map(|k| Identifier::parse(k)).collect())
    }

    fn upsert(&self, records: &[Record], conflict_key: &str) -> Result<usize, StoreError> {
        if conflict_key != self.key_column {
            return Err(StoreError::Permanent(format!(
                "no unique constraint on {}.{conflict_key}",
                self.table
            )));
        }
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO \"{t}\" (\"{k}\", \"{d}\", attributes) VALUES (?1, ?2, ?3)
             ON CONFLICT(\"{k}\") DO UPDATE SET
                \"{d}\" = excluded.\"{d}\",
                attributes = excluded.attributes",
            t = self.table,
            k = self.key_column,
            d = self.date_column,
        );

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for r in records {
                let attrs = serde_json::to_string(&r.attributes)
                    .map_err(|e| StoreError::Permanent(e.to_string()))?;
                stmt.execute(params![
                    r.key.as_str(),
                    r.inserted_date.map(format_date),
                    attrs
                ])?;
            }
        }
        // Dropping `tx` without commit rolls the whole batch back.
        tx.commit()?;
        Ok(records.len())
    }

    fn scan_keys(
        &self,
        view: ExistenceView,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let (view_sql, cutoff) = self.view_clause(view, 3);
        let sql = format!(
            "SELECT \"{k}\" FROM \"{t}\" WHERE 1 = 1{view_sql}
             ORDER BY rowid LIMIT ?1 OFFSET ?2",
            t = self.table,
            k = self.key_column,
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = match cutoff {
            Some(c) => stmt
                .query_map(params![limit as i64, offset as i64, c], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?,
            None => stmt
                .query_map(params![limit as i64, offset as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?,
        };
        Ok(rows)
    }
}
