//! Read path: which candidates does the store not know yet?
//!
//! Design:
//!   - existing = union of lookup_existing() over bounded chunks
//!   - missing  = candidates − existing
//!   - Date scoping ("new since yesterday") is carried by the
//!     ExistenceView handed to the store, not by this algorithm.
//!   - Nothing is cached between calls; the store is the source of truth.

use crate::{
    chunker::{check_chunk_size, chunks},
    config::{LookupConfig, LookupStrategy},
    error::ReconResult,
    store::{ExistenceView, RemoteStore},
    types::{CandidateSet, Identifier},
};
use std::collections::HashSet;

pub struct Reconciler<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    chunk_size: usize,
    page_size: usize,
    strategy: LookupStrategy,
    view: ExistenceView,
}

impl<'a, S: RemoteStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, cfg: &LookupConfig) -> ReconResult<Self> {
        check_chunk_size(cfg.chunk_size)?;
        check_chunk_size(cfg.page_size)?;
        Ok(Self {
            store,
            chunk_size: cfg.chunk_size,
            page_size: cfg.page_size,
            strategy: cfg.strategy,
            view: ExistenceView::Current,
        })
    }

    /// Answer existence questions as of a different view.
    pub fn with_view(mut self, view: ExistenceView) -> Self {
        self.view = view;
        self
    }

    pub fn view(&self) -> ExistenceView {
        self.view
    }

    /// Candidates not present in the store. Either complete or an error;
    /// there is no partial result.
    pub fn missing(&self, candidates: &CandidateSet) -> ReconResult<HashSet<Identifier>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }
        let existing = self.existing(candidates)?;
        let missing: HashSet<Identifier> = candidates.difference(&existing).cloned().collect();
        log::debug!(
            "reconcile: {} candidates, {} known, {} missing ({:?})",
            candidates.len(),
            existing.len(),
            missing.len(),
            self.view
        );
        Ok(missing)
    }

    /// Candidates already present in the store (the complement of
    /// [`Self::missing`]).
    pub fn existing(&self, candidates: &CandidateSet) -> ReconResult<HashSet<Identifier>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }
        match self.strategy {
            LookupStrategy::Filtered => self.existing_filtered(candidates),
            LookupStrategy::FullScan => self.existing_by_scan(candidates),
        }
    }

    /// `missing`, with the result sorted for stable output.
    pub fn missing_sorted(&self, candidates: &CandidateSet) -> ReconResult<Vec<Identifier>> {
        let mut out: Vec<Identifier> = self.missing(candidates)?.into_iter().collect();
        out.sort();
        Ok(out)
    }

    fn existing_filtered(&self, candidates: &CandidateSet) -> ReconResult<HashSet<Identifier>> {
        // Sorted so chunk boundaries (and request logs) are reproducible.
        let mut keys: Vec<Identifier> = candidates.iter().cloned().collect();
        keys.sort();

        let mut existing = HashSet::new();
        for chunk in chunks(&keys, self.chunk_size)? {
            let found = self.store.lookup_existing(chunk, self.view)?;
            existing.extend(found.into_iter().filter(|k| candidates.contains(k)));
        }
        Ok(existing)
    }

    fn existing_by_scan(&self, candidates: &CandidateSet) -> ReconResult<HashSet<Identifier>> {
        let mut existing = HashSet::new();
        let mut offset = 0;
        loop {
            let page = self.store.scan_keys(self.view, offset, self.page_size)?;
            let len = page.len();
            existing.extend(
                page.iter()
                    .filter_map(|raw| Identifier::parse(raw))
                    .filter(|k| candidates.contains(k)),
            );
            if len < self.page_size {
                break;
            }
            offset += len;
        }
        Ok(existing)
    }
}
