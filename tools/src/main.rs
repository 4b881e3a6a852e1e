//! recon-runner: command-line front end for identifier reconciliation.
//!
//! Usage:
//!   recon-runner import  --input rows.jsonl [--config cfg.json] [--db recon.db]
//!   recon-runner missing --input rows.jsonl
//!   recon-runner summary --input rows.jsonl --by date|operator|class
//!   recon-runner runs    [--limit 20]
//!
//! Drill options: `--fault-rate 0.2 --seed 7` wraps the store in a
//! deterministic fault injector.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use recon_core::{
    filter::apply_filters,
    importer::{BatchImporter, ImportOptions},
    reconciler::Reconciler,
    store::{FaultInjectingStore, FaultPlan, RemoteStore, SqliteStore},
    summary::SummaryAggregator,
    types::{extract_records, CandidateSet, Extraction, RawRecord},
    ReconConfig,
};
use serde_json::{json, Value};
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        bail!("usage: recon-runner <import|missing|summary|runs> [flags]");
    };

    let cfg = match string_arg(&args, "--config") {
        Some(path) => ReconConfig::load(path)?,
        None => ReconConfig::default(),
    };
    let db = string_arg(&args, "--db").unwrap_or("recon.db");
    let fault_rate = parse_arg(&args, "--fault-rate", 0.0f64);
    let seed = parse_arg(&args, "--seed", 42u64);

    let sqlite = SqliteStore::open(db, &cfg.table, &cfg.store)?;
    let faulty = (fault_rate > 0.0)
        .then(|| FaultInjectingStore::new(&sqlite, FaultPlan::flaky(fault_rate, seed)));
    let remote: &dyn RemoteStore = match &faulty {
        Some(f) => f,
        None => &sqlite,
    };
    log::info!(
        "recon-runner {command}: table {} in {db} (fault rate {fault_rate})",
        cfg.table.name
    );

    let output = match command {
        "import" => run_import(&args, &cfg, &sqlite, remote)?,
        "missing" => run_missing(&args, &cfg, remote)?,
        "summary" => run_summary(&args, &cfg, remote)?,
        "runs" => {
            let limit = parse_arg(&args, "--limit", 20usize);
            serde_json::to_value(sqlite.recent_import_runs(limit)?)?
        }
        other => bail!("unknown command '{other}'"),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_import(
    args: &[String],
    cfg: &ReconConfig,
    ledger: &SqliteStore,
    remote: &dyn RemoteStore,
) -> Result<Value> {
    let extraction = load_records(args, cfg)?;
    let opts = ImportOptions::from(&cfg.import);

    let started_at = Utc::now();
    let outcome = BatchImporter::new(remote, &cfg.lookup).run(
        extraction.records,
        &cfg.table.key_column,
        &opts,
    )?;
    let finished_at = Utc::now();

    let run_id = uuid::Uuid::new_v4().to_string();
    ledger.record_import_run(&run_id, started_at, finished_at, &outcome)?;

    Ok(json!({
        "run_id": run_id,
        "rejected_rows": extraction.rejected,
        "outcome": outcome,
    }))
}

fn run_missing(args: &[String], cfg: &ReconConfig, remote: &dyn RemoteStore) -> Result<Value> {
    let extraction = load_records(args, cfg)?;
    let candidates: CandidateSet = extraction.records.iter().map(|r| r.key.clone()).collect();
    let missing = Reconciler::new(remote, &cfg.lookup)?.missing_sorted(&candidates)?;

    Ok(json!({
        "candidates": candidates.len(),
        "missing_count": missing.len(),
        "missing": missing,
    }))
}

fn run_summary(args: &[String], cfg: &ReconConfig, remote: &dyn RemoteStore) -> Result<Value> {
    let extraction = load_records(args, cfg)?;
    let aggregator = SummaryAggregator::new(remote, &cfg.lookup);
    let records = &extraction.records;

    let value = match string_arg(args, "--by").unwrap_or("date") {
        "date" => serde_json::to_value(aggregator.summarize_by_date(records)?)?,
        "operator" => serde_json::to_value(
            aggregator.summarize_by_operator(records, &cfg.operator_column)?,
        )?,
        "class" => serde_json::to_value(aggregator.summarize_by_operator_class(
            records,
            &cfg.operator_column,
            &cfg.operator_classes,
        )?)?,
        other => bail!("unknown summary partition '{other}' (expected date, operator or class)"),
    };
    Ok(value)
}

/// Read, filter and validate the `--input` rows.
fn load_records(args: &[String], cfg: &ReconConfig) -> Result<Extraction> {
    let Some(path) = string_arg(args, "--input") else {
        bail!("--input <rows.jsonl> is required");
    };
    let rows = apply_filters(read_rows(path)?, &cfg.filters);
    Ok(extract_records(
        &rows,
        &cfg.table.key_column,
        &cfg.table.date_column,
    ))
}

/// One JSON object per line; scalar values become cell text, `null`
/// becomes a missing cell.
fn read_rows(path: &str) -> Result<Vec<RawRecord>> {
    let file = File::open(path).with_context(|| format!("Cannot open {path}"))?;
    let mut rows = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Cannot read {path}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let object: serde_json::Map<String, Value> = serde_json::from_str(&line)
            .with_context(|| format!("{path}:{}: expected a JSON object", n + 1))?;
        rows.push(
            object
                .into_iter()
                .map(|(column, value)| (column, cell_text(value)))
                .collect(),
        );
    }
    log::info!("read {} rows from {path}", rows.len());
    Ok(rows)
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
