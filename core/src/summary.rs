//! Per-partition "total / unique / new" summaries.
//!
//! "New" for a partition means: unique identifiers of the partition the
//! store did not know as of the partition's cutoff. The default cutoff
//! is the day before the partition date, i.e. known up to yesterday.

use crate::{
    config::{LookupConfig, OperatorClass},
    error::ReconResult,
    reconciler::Reconciler,
    store::{ExistenceView, RemoteStore},
    types::{CandidateSet, Identifier, Record},
};
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A whole-number percentage. Zero when the denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Percent(u64);

impl Percent {
    pub fn of(numerator: usize, denominator: usize) -> Self {
        if denominator == 0 {
            return Self(0);
        }
        Self((numerator as f64 * 100.0 / denominator as f64).round() as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary<K> {
    pub partition: K,
    pub cutoff: Option<NaiveDate>,
    pub total: usize,
    pub unique: usize,
    pub new: usize,
    pub unique_pct: Percent,
    pub new_pct: Percent,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_identifiers: Vec<Identifier>,
}

impl<K> PartitionSummary<K> {
    /// Derive the percentage fields: unique/total and new/unique.
    pub fn new(
        partition: K,
        cutoff: Option<NaiveDate>,
        total: usize,
        unique: usize,
        new_identifiers: Vec<Identifier>,
    ) -> Self {
        let new = new_identifiers.len();
        Self {
            partition,
            cutoff,
            total,
            unique,
            new,
            unique_pct: Percent::of(unique, total),
            new_pct: Percent::of(new, unique),
            new_identifiers,
        }
    }
}

/// Partition key for operator-level summaries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OperatorPartition {
    pub date: NaiveDate,
    pub operator: String,
}

/// Known-up-to-yesterday cutoff.
pub fn previous_day(date: &NaiveDate) -> Option<NaiveDate> {
    date.pred_opt()
}

pub struct SummaryAggregator<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    lookup: LookupConfig,
}

impl<'a, S: RemoteStore + ?Sized> SummaryAggregator<'a, S> {
    pub fn new(store: &'a S, lookup: &LookupConfig) -> Self {
        Self {
            store,
            lookup: lookup.clone(),
        }
    }

    /// Group `records` by `partition_key` (records mapping to `None` are
    /// left out) and summarize each partition against the store view
    /// scoped by `cutoff_resolver`. A `None` cutoff means the current
    /// view. Output is in ascending partition order.
    pub fn summarize<K, P, C>(
        &self,
        records: &[Record],
        partition_key: P,
        cutoff_resolver: C,
    ) -> ReconResult<Vec<PartitionSummary<K>>>
    where
        K: Ord + Clone + fmt::Debug,
        P: Fn(&Record) -> Option<K>,
        C: Fn(&K) -> Option<NaiveDate>,
    {
        self.summarize_overlapping(records, partition_key, cutoff_resolver)
    }

    /// Like [`Self::summarize`], but a record may fall into several
    /// partitions at once and is counted in each of them.
    pub fn summarize_overlapping<K, I, P, C>(
        &self,
        records: &[Record],
        partition_keys: P,
        cutoff_resolver: C,
    ) -> ReconResult<Vec<PartitionSummary<K>>>
    where
        K: Ord + Clone + fmt::Debug,
        I: IntoIterator<Item = K>,
        P: Fn(&Record) -> I,
        C: Fn(&K) -> Option<NaiveDate>,
    {
        let mut groups: BTreeMap<K, Vec<&Record>> = BTreeMap::new();
        let mut excluded = 0usize;
        for r in records {
            let mut placed = false;
            for k in partition_keys(r) {
                groups.entry(k).or_default().push(r);
                placed = true;
            }
            if !placed {
                excluded += 1;
            }
        }
        if excluded > 0 {
            log::info!("summary: {excluded} records had no partition key and were left out");
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, rows) in groups {
            let unique: CandidateSet = rows.iter().map(|r| r.key.clone()).collect();
            let cutoff = cutoff_resolver(&key);
            let view = cutoff.map_or(ExistenceView::Current, ExistenceView::KnownOnOrBefore);

            let new_identifiers = if unique.is_empty() {
                Vec::new()
            } else {
                Reconciler::new(self.store, &self.lookup)?
                    .with_view(view)
                    .missing_sorted(&unique)?
            };

            let summary = PartitionSummary::new(
                key,
                cutoff,
                rows.len(),
                unique.len(),
                new_identifiers,
            );
            log::debug!(
                "summary: {:?} total={} unique={} new={}",
                summary.partition,
                summary.total,
                summary.unique,
                summary.new
            );
            out.push(summary);
        }
        Ok(out)
    }

    /// One partition per insertion date; undated records are left out.
    pub fn summarize_by_date(
        &self,
        records: &[Record],
    ) -> ReconResult<Vec<PartitionSummary<NaiveDate>>> {
        self.summarize(records, |r| r.inserted_date, previous_day)
    }

    /// One partition per (date, operator), the operator being read from
    /// the `operator_column` attribute.
    pub fn summarize_by_operator(
        &self,
        records: &[Record],
        operator_column: &str,
    ) -> ReconResult<Vec<PartitionSummary<OperatorPartition>>> {
        self.summarize(
            records,
            |r| {
                Some(OperatorPartition {
                    date: r.inserted_date?,
                    operator: r.attribute(operator_column)?.to_string(),
                })
            },
            |p| previous_day(&p.date),
        )
    }

    /// One partition per (date, operator class). Classes are matched
    /// independently: "Emp Mintu" counts as both Employee and Intern.
    /// Operators matching no class are left out.
    pub fn summarize_by_operator_class(
        &self,
        records: &[Record],
        operator_column: &str,
        classes: &[OperatorClass],
    ) -> ReconResult<Vec<PartitionSummary<OperatorPartition>>> {
        self.summarize_overlapping(
            records,
            |r| {
                let (Some(date), Some(operator)) =
                    (r.inserted_date, r.attribute(operator_column))
                else {
                    return Vec::new();
                };
                classes
                    .iter()
                    .filter(|c| c.matches(operator))
                    .map(|c| OperatorPartition {
                        date,
                        operator: c.label.clone(),
                    })
                    .collect::<Vec<_>>()
            },
            |p| previous_day(&p.date),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominators_give_zero_percent() {
        assert_eq!(Percent::of(0, 0).to_string(), "0%");
        assert_eq!(Percent::of(5, 0).to_string(), "0%");

        let empty: PartitionSummary<&str> = PartitionSummary::new("d", None, 0, 0, Vec::new());
        assert_eq!(empty.unique_pct.to_string(), "0%");
        assert_eq!(empty.new_pct.to_string(), "0%");
    }

    #[test]
    fn percentages_round_to_whole_numbers() {
        assert_eq!(Percent::of(1, 3).to_string(), "33%");
        assert_eq!(Percent::of(2, 3).to_string(), "67%");
        assert_eq!(Percent::of(4, 4).to_string(), "100%");
    }

    #[test]
    fn percent_serializes_as_display_string() {
        let json = serde_json::to_string(&Percent::of(1, 2)).unwrap();
        assert_eq!(json, "\"50%\"");
    }
}
