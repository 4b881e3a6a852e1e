//! Identifier reconciliation against a remote table: find the candidates
//! the store does not know yet, write them back in resilient batches, and
//! summarize "new" identifiers per partition.

pub mod chunker;
pub mod config;
pub mod error;
pub mod filter;
pub mod importer;
pub mod normalizer;
pub mod reconciler;
pub mod store;
pub mod summary;
pub mod types;

pub use config::ReconConfig;
pub use error::{ReconError, ReconResult, StoreError};
pub use importer::{BatchImporter, ImportOptions, ImportOutcome};
pub use reconciler::Reconciler;
pub use store::{ExistenceView, MemoryStore, RemoteStore, SqliteStore};
pub use summary::{PartitionSummary, Percent, SummaryAggregator};
pub use types::{Identifier, RawRecord, Record};
