//! Deterministic fault injection around any `RemoteStore`.
//!
//! Used to drill the importer's retry/shrink policy without a flaky
//! network. All randomness comes from a PCG stream derived from the
//! plan's seed, so a given plan fails the same calls on every run.

use super::{ExistenceView, RemoteStore};
use crate::{
    error::StoreError,
    types::{Identifier, Record},
};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::HashSet;
use std::sync::Mutex;

/// Which calls should fail, and how.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Upserts with more records than this fail transiently
    /// (a statement-timeout stand-in).
    pub transient_above: Option<usize>,
    /// Probability in [0, 1] that any upsert or lookup fails transiently.
    pub transient_rate: f64,
    /// Upserts containing any of these identifiers fail permanently.
    pub permanent_keys: HashSet<Identifier>,
    pub seed: u64,
}

impl FaultPlan {
    pub fn timeout_above(size: usize) -> Self {
        Self {
            transient_above: Some(size),
            ..Self::default()
        }
    }

    pub fn reject_keys<I: IntoIterator<Item = Identifier>>(keys: I) -> Self {
        Self {
            permanent_keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn flaky(rate: f64, seed: u64) -> Self {
        Self {
            transient_rate: rate.clamp(0.0, 1.0),
            seed,
            ..Self::default()
        }
    }
}

pub struct FaultInjectingStore<S> {
    inner: S,
    plan: FaultPlan,
    rng: Mutex<Pcg64Mcg>,
    upsert_attempts: Mutex<Vec<usize>>,
}

impl<S: RemoteStore> FaultInjectingStore<S> {
    pub fn new(inner: S, plan: FaultPlan) -> Self {
        let derived_seed = plan.seed ^ 0x9e37_79b9_7f4a_7c15;
        Self {
            inner,
            rng: Mutex::new(Pcg64Mcg::seed_from_u64(derived_seed)),
            plan,
            upsert_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Sizes of every upsert attempted, including failed ones, in order.
    pub fn upsert_attempts(&self) -> Vec<usize> {
        self.upsert_attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn roll(&self) -> bool {
        if self.plan.transient_rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        let draw = (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64);
        draw < self.plan.transient_rate
    }
}

impl<S: RemoteStore> RemoteStore for FaultInjectingStore<S> {
    fn key_column(&self) -> &str {
        self.inner.key_column()
    }

    fn lookup_existing(
        &self,
        keys: &[Identifier],
        view: ExistenceView,
    ) -> Result<HashSet<Identifier>, StoreError> {
        if self.roll() {
            return Err(StoreError::Transient("injected: connection reset".into()));
        }
        self.inner.lookup_existing(keys, view)
    }

    fn upsert(&self, records: &[Record], conflict_key: &str) -> Result<usize, StoreError> {
        self.upsert_attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(records.len());

        if let Some(bad) = records
            .iter()
            .find(|r| self.plan.permanent_keys.contains(&r.key))
        {
            return Err(StoreError::Permanent(format!(
                "injected: constraint violation on '{}'",
                bad.key
            )));
        }
        if let Some(limit) = self.plan.transient_above {
            if records.len() > limit {
                return Err(StoreError::Transient(format!(
                    "injected: statement timeout for batch of {}",
                    records.len()
                )));
            }
        }
        if self.roll() {
            return Err(StoreError::Transient("injected: connection reset".into()));
        }
        self.inner.upsert(records, conflict_key)
    }

    fn scan_keys(
        &self,
        view: ExistenceView,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.scan_keys(view, offset, limit)
    }
}
