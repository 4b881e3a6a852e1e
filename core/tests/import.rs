//! Integration tests for the write path: chunked upserts with adaptive
//! chunk sizing.
//!
//! Tests verify:
//! 1. Importing the same records twice leaves the same store state
//! 2. Transient failures shrink the chunk until batches fit
//! 3. A permanent failure is isolated to its chunk and never retried
//! 4. Exhausted retries record the chunk and move on
//! 5. Back-off grows exponentially with each retry
//! 6. Configuration mistakes are returned as errors, not outcomes
//! 7. `run` collapses duplicates and skips identifiers already stored

use chrono::NaiveDate;
use recon_core::{
    config::{ImportConfig, LookupConfig},
    error::{ReconError, StoreError},
    importer::dedupe_keep_latest,
    store::{FaultInjectingStore, FaultPlan, MemoryStore},
    types::{Identifier, Record},
    BatchImporter, ImportOptions,
};
use std::time::Duration;

const KEY: &str = "Upi_vpa";

fn id(raw: &str) -> Identifier {
    Identifier::parse(raw).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(id(&format!("user{i}@bank")), Some(day(1))))
        .collect()
}

fn importer(store: &MemoryStore) -> BatchImporter<'_, MemoryStore> {
    BatchImporter::new(store, &LookupConfig::default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: idempotence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn importing_twice_leaves_the_same_state() {
    let store = MemoryStore::new(KEY);
    let batch = records(7);

    let first = importer(&store)
        .import_all(&batch, KEY, 3, 3, Duration::ZERO)
        .unwrap();
    assert_eq!(first.inserted, 7);
    assert_eq!(store.len(), 7);

    // Second run carries updated attributes; the later values win.
    let updated: Vec<Record> = batch
        .iter()
        .cloned()
        .map(|r| r.with_attribute("Input_user", "Emp Vidhi"))
        .collect();
    let second = importer(&store)
        .import_all(&updated, KEY, 3, 3, Duration::ZERO)
        .unwrap();

    assert!(second.is_complete());
    assert_eq!(store.len(), 7);
    let attrs = store.attributes(&id("user4@bank")).unwrap();
    assert_eq!(attrs.get("Input_user").map(String::as_str), Some("Emp Vidhi"));
}

#[test]
fn empty_import_makes_no_store_calls() {
    let store = MemoryStore::new(KEY);
    let outcome = importer(&store)
        .import_all(&[], KEY, 5, 3, Duration::ZERO)
        .unwrap();
    assert_eq!(outcome.inserted, 0);
    assert!(outcome.errors.is_empty());
    assert!(store.stats().upsert_sizes.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: adaptive shrink on transient failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn transient_failures_shrink_the_chunk() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::timeout_above(4));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(10), KEY, 8, 3, Duration::ZERO)
        .unwrap();

    assert_eq!(outcome.inserted, 10);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.final_chunk_size, 4);

    let attempts = store.upsert_attempts();
    assert!(attempts.iter().any(|&n| n <= 4), "attempts: {attempts:?}");
    assert_eq!(attempts, vec![8, 4, 4, 2]);
    assert_eq!(inner.len(), 10);
}

#[test]
fn shrink_floors_at_one() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::timeout_above(1));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(3), KEY, 16, 10, Duration::ZERO)
        .unwrap();

    // The failed chunk held 3 records, so the next size is 1, not 8.
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.final_chunk_size, 1);
    assert_eq!(outcome.retries, 1);
    assert_eq!(store.upsert_attempts(), vec![3, 1, 1, 1]);
}

#[test]
fn shrink_starts_from_the_failed_chunk_not_the_configured_size() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::timeout_above(4));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(10), KEY, 5000, 3, Duration::ZERO)
        .unwrap();

    assert_eq!(outcome.inserted, 10);
    assert!(outcome.is_complete());
    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.final_chunk_size, 2);
    assert_eq!(store.upsert_attempts(), vec![10, 5, 2, 2, 2, 2, 2]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: permanent failure isolation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn permanent_failure_is_isolated_to_its_chunk() {
    let batch = records(10);
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(
        &inner,
        FaultPlan::reject_keys([batch[5].key.clone()]),
    );

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&batch, KEY, 2, 3, Duration::ZERO)
        .unwrap();

    assert_eq!(outcome.inserted, 8);
    assert_eq!(outcome.errors.len(), 1);
    let err = &outcome.errors[0];
    assert_eq!((err.batch_index, err.offset, err.len), (2, 4, 2));
    assert_eq!(err.attempts, 1);
    assert!(!err.error.is_transient());
    assert_eq!(outcome.retries, 0);

    // Five chunks, each attempted exactly once.
    assert_eq!(store.upsert_attempts(), vec![2, 2, 2, 2, 2]);
    assert!(!inner.contains(&batch[4].key));
    assert!(inner.contains(&batch[6].key));
    assert_eq!(outcome.failed_records(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: exhausted retries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn exhausted_retries_record_the_chunk() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::flaky(1.0, 11));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(4), KEY, 4, 2, Duration::ZERO)
        .unwrap();

    // 4 → retry at 2 → retry at 1 → give up on [0..1], then the rest.
    assert_eq!(outcome.inserted, 0);
    assert!(!outcome.is_complete());
    assert_eq!(outcome.errors[0].attempts, 3);
    assert!(matches!(outcome.errors[0].error, StoreError::Transient(_)));
    assert_eq!(outcome.failed_records(), 4);
    assert!(inner.is_empty());
}

#[test]
fn zero_retries_fails_on_first_transient_error() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::timeout_above(2));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(5), KEY, 3, 0, Duration::ZERO)
        .unwrap();

    assert_eq!(outcome.retries, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].offset, 0);
    // The trailing two-record chunk is under the limit.
    assert_eq!(outcome.inserted, 2);
    assert_eq!(store.upsert_attempts(), vec![3, 2]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: exponential back-off
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn backoff_doubles_per_retry() {
    let inner = MemoryStore::new(KEY);
    let store = FaultInjectingStore::new(&inner, FaultPlan::timeout_above(1));

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(1), KEY, 4, 3, Duration::from_millis(1))
        .unwrap();

    // A single record never exceeds the limit: no retries at all.
    assert_eq!(outcome.retries, 0);

    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .import_all(&records(8), KEY, 8, 3, Duration::from_millis(1))
        .unwrap();

    // 8 → 4 → 2 → 1: sleeps of 1, 2 and 4 ms.
    assert_eq!(outcome.retries, 3);
    assert_eq!(outcome.total_backoff, Duration::from_millis(7));
    assert_eq!(outcome.inserted, 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: configuration errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn bad_arguments_are_errors() {
    let store = MemoryStore::new(KEY);
    let imp = importer(&store);

    assert!(matches!(
        imp.import_all(&records(2), KEY, 0, 3, Duration::ZERO),
        Err(ReconError::InvalidChunkSize { size: 0 })
    ));
    assert!(matches!(
        imp.import_all(&records(2), "  ", 2, 3, Duration::ZERO),
        Err(ReconError::EmptyConflictKey)
    ));
    assert!(matches!(
        imp.import_all(&records(2), "Inserted_date", 2, 3, Duration::ZERO),
        Err(ReconError::ConflictKeyMismatch { .. })
    ));
    assert!(store.stats().upsert_sizes.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: de-duplication and skip-existing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn dedupe_keeps_the_latest_record() {
    let input = vec![
        Record::new(id("a@x"), Some(day(2))).with_attribute("n", "first"),
        Record::new(id("b@x"), None),
        Record::new(id("A@X"), Some(day(1))).with_attribute("n", "older"),
        Record::new(id("a@x"), Some(day(2))).with_attribute("n", "tie"),
        Record::new(id("b@x"), Some(day(1))),
    ];
    let (out, collapsed) = dedupe_keep_latest(input);

    assert_eq!(collapsed, 3);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].key, id("a@x"));
    assert_eq!(out[0].attribute("n"), Some("tie"));
    assert_eq!(out[1].inserted_date, Some(day(1)));
}

#[test]
fn run_skips_known_identifiers() {
    let store = MemoryStore::with_keys(KEY, [("user0@bank", Some(day(1)))]);
    let mut input = records(3);
    input.push(Record::new(id("user2@bank"), Some(day(3))));

    let opts = ImportOptions {
        initial_chunk_size: 10,
        max_retries: 3,
        backoff_base: Duration::ZERO,
        skip_existing: true,
        dedupe: true,
    };
    let outcome = importer(&store).run(input, KEY, &opts).unwrap();

    assert_eq!(outcome.duplicates_collapsed, 1);
    assert_eq!(outcome.skipped_existing, 1);
    assert_eq!(outcome.attempted, 2);
    assert_eq!(outcome.inserted, 2);
    assert_eq!(store.len(), 3);
    assert_eq!(store.inserted_date(&id("user2@bank")), Some(day(3)));
}

#[test]
fn failed_prefetch_still_imports() {
    let inner = MemoryStore::new(KEY);
    let plan = FaultPlan {
        transient_rate: 1.0,
        ..FaultPlan::default()
    };
    let store = FaultInjectingStore::new(&inner, plan);

    let opts = ImportOptions {
        max_retries: 0,
        ..ImportOptions::from(&ImportConfig::default())
    };
    let outcome = BatchImporter::new(&store, &LookupConfig::default())
        .run(records(3), KEY, &opts)
        .unwrap();

    // The lookup failed, so nothing was skipped; the upsert then hit the
    // same injected fault and was recorded, not raised.
    assert_eq!(outcome.skipped_existing, 0);
    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.errors.len(), 1);
}
