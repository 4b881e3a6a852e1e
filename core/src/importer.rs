//! Write path: chunked insert-or-update with adaptive chunk sizing.
//!
//! State machine per chunk, starting at `initial_chunk_size`:
//!   1. Attempt upsert of the current chunk.
//!   2. Success → count its records, advance at the current size.
//!   3. Transient failure with retries left → halve the length of the
//!      chunk that failed (floor 1), sleep `backoff_base * 2^attempt`,
//!      re-slice the same unconsumed records. The failed chunk can be
//!      shorter than the size limit at the tail of the input, so the
//!      halving starts from its length. The shrink is sticky.
//!   4. Transient failure with retries exhausted, or permanent failure →
//!      record (batch, error) and advance past the chunk.
//!   5. All input consumed → outcome is final.
//!
//! RULE: data-level failures never escape as `Err`. Only configuration
//! mistakes (bad chunk size, bad conflict key) do.

use crate::{
    chunker::check_chunk_size,
    config::{ImportConfig, LookupConfig},
    error::{ReconError, ReconResult, StoreError},
    reconciler::Reconciler,
    store::RemoteStore,
    types::{CandidateSet, Identifier, Record},
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub initial_chunk_size: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub skip_existing: bool,
    pub dedupe: bool,
}

impl From<&ImportConfig> for ImportOptions {
    fn from(cfg: &ImportConfig) -> Self {
        Self {
            initial_chunk_size: cfg.initial_chunk_size,
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base(),
            skip_existing: cfg.skip_existing,
            dedupe: cfg.dedupe,
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

/// A chunk that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportError {
    /// Position of the chunk among all chunks that reached a final state.
    pub batch_index: usize,
    /// Offset of the chunk's first record in the submitted sequence.
    pub offset: usize,
    pub len: usize,
    pub attempts: u32,
    pub error: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    /// Records submitted to the chunk loop.
    pub attempted: usize,
    /// Records in committed chunks.
    pub inserted: usize,
    pub errors: Vec<ImportError>,
    pub duplicates_collapsed: usize,
    pub skipped_existing: usize,
    pub batches_committed: usize,
    pub retries: usize,
    pub total_backoff: Duration,
    pub final_chunk_size: usize,
}

impl ImportOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records that were attempted but sit in failed chunks.
    pub fn failed_records(&self) -> usize {
        self.errors.iter().map(|e| e.len).sum()
    }
}

pub struct BatchImporter<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    lookup: LookupConfig,
}

impl<'a, S: RemoteStore + ?Sized> BatchImporter<'a, S> {
    pub fn new(store: &'a S, lookup: &LookupConfig) -> Self {
        Self {
            store,
            lookup: lookup.clone(),
        }
    }

    /// Full import: optional de-duplication and pre-filter of known
    /// identifiers, then [`Self::import_all`].
    pub fn run(
        &self,
        records: Vec<Record>,
        conflict_key: &str,
        opts: &ImportOptions,
    ) -> ReconResult<ImportOutcome> {
        self.check_conflict_key(conflict_key)?;
        check_chunk_size(opts.initial_chunk_size)?;

        let received = records.len();
        let (records, duplicates_collapsed) = if opts.dedupe {
            dedupe_keep_latest(records)
        } else {
            (records, 0)
        };

        let (records, skipped_existing) = if opts.skip_existing {
            self.drop_known(records)?
        } else {
            (records, 0)
        };

        log::info!(
            "import: {received} received, {duplicates_collapsed} duplicates collapsed, \
             {skipped_existing} already known, {} to write",
            records.len()
        );

        let mut outcome = self.import_all(
            &records,
            conflict_key,
            opts.initial_chunk_size,
            opts.max_retries,
            opts.backoff_base,
        )?;
        outcome.duplicates_collapsed = duplicates_collapsed;
        outcome.skipped_existing = skipped_existing;
        Ok(outcome)
    }

    /// The chunk loop. Chunks are attempted strictly in input order; a
    /// later chunk never starts before the earlier one is settled.
    pub fn import_all(
        &self,
        records: &[Record],
        conflict_key: &str,
        initial_chunk_size: usize,
        max_retries: u32,
        backoff_base: Duration,
    ) -> ReconResult<ImportOutcome> {
        self.check_conflict_key(conflict_key)?;
        check_chunk_size(initial_chunk_size)?;

        let mut outcome = ImportOutcome {
            attempted: records.len(),
            final_chunk_size: initial_chunk_size,
            ..ImportOutcome::default()
        };

        let mut size = initial_chunk_size;
        let mut pos = 0;
        let mut attempts: u32 = 0;
        let mut batch_index = 0;

        while pos < records.len() {
            let end = (pos + size).min(records.len());
            let batch = &records[pos..end];

            match self.store.upsert(batch, conflict_key) {
                Ok(written) => {
                    log::debug!(
                        "import: batch {batch_index} committed ({written} rows, offset {pos})"
                    );
                    outcome.inserted += batch.len();
                    outcome.batches_committed += 1;
                    pos = end;
                    attempts = 0;
                    batch_index += 1;
                }
                Err(e) if e.is_transient() && attempts < max_retries => {
                    let delay = backoff_base.saturating_mul(2u32.saturating_pow(attempts));
                    attempts += 1;
                    size = (size.min(batch.len()) / 2).max(1);
                    outcome.retries += 1;
                    outcome.total_backoff += delay;
                    log::warn!(
                        "import: batch {batch_index} failed ({e}); retry {attempts}/{max_retries} \
                         at chunk size {size} after {delay:?}"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "import: batch {batch_index} (offset {pos}, {} rows) abandoned: {e}",
                        batch.len()
                    );
                    outcome.errors.push(ImportError {
                        batch_index,
                        offset: pos,
                        len: batch.len(),
                        attempts: attempts + 1,
                        error: e,
                    });
                    pos = end;
                    attempts = 0;
                    batch_index += 1;
                }
            }
        }

        outcome.final_chunk_size = size;
        log::info!(
            "import: {} of {} rows written in {} batches, {} failed batches, {} retries",
            outcome.inserted,
            outcome.attempted,
            outcome.batches_committed,
            outcome.errors.len(),
            outcome.retries
        );
        Ok(outcome)
    }

    fn check_conflict_key(&self, conflict_key: &str) -> ReconResult<()> {
        if conflict_key.trim().is_empty() {
            return Err(ReconError::EmptyConflictKey);
        }
        if conflict_key != self.store.key_column() {
            return Err(ReconError::ConflictKeyMismatch {
                expected: self.store.key_column().to_string(),
                actual: conflict_key.to_string(),
            });
        }
        Ok(())
    }

    /// Remove records whose identifier the store already has. A failed
    /// lookup is not fatal: the upsert's conflict handling covers it.
    fn drop_known(&self, records: Vec<Record>) -> ReconResult<(Vec<Record>, usize)> {
        let candidates: CandidateSet = records.iter().map(|r| r.key.clone()).collect();
        let known = match Reconciler::new(self.store, &self.lookup)?.existing(&candidates) {
            Ok(k) => k,
            Err(e) => {
                log::warn!("import: existing-key prefetch failed, writing all rows: {e}");
                return Ok((records, 0));
            }
        };
        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| !known.contains(&r.key))
            .collect();
        let skipped = before - kept.len();
        Ok((kept, skipped))
    }
}

/// Collapse records sharing an identifier. The greatest insertion date
/// wins; on a tie the later record wins; a dated record beats an undated
/// one. Survivors keep the position of their identifier's first
/// appearance.
pub fn dedupe_keep_latest(records: Vec<Record>) -> (Vec<Record>, usize) {
    let mut index: HashMap<Identifier, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<Record> = Vec::with_capacity(records.len());
    let mut collapsed = 0;

    for r in records {
        match index.get(&r.key) {
            Some(&i) => {
                collapsed += 1;
                if r.inserted_date >= out[i].inserted_date {
                    out[i] = r;
                }
            }
            None => {
                index.insert(r.key.clone(), out.len());
                out.push(r);
            }
        }
    }
    (out, collapsed)
}
