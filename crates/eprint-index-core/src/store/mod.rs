//! Storage abstractions for the eprint index.
//!
//! Three independent backing stores sit behind the engines:
//!
//! | Trait | Holds | Atomic unit |
//! |-------|-------|-------------|
//! | [`RecordStore`] | indexed records, PDS registry | single statement |
//! | [`CounterStore`] | counters, HyperLogLogs, windowed sets | one [`CounterPipeline`] |
//! | [`GraphStore`] | indexed entities, citation edges | one [`CitationBatch`] |
//!
//! Implementations must be `Send + Sync` so one instance can be shared by
//! every request-handling task. In-memory backends live in [`memory`];
//! SQLite backends live in the application crate.

pub mod counter;
pub mod graph;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AggregatedMetrics, IndexedRecord, PdsRegistration};

pub use counter::{CounterOp, CounterPipeline, CounterRead, CounterStore};
pub use graph::{CitationBatch, EntityKind, GraphStore};

/// Primary store for indexed-record metadata, keyed by URI.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_record`](RecordStore::get_record) | Load one record |
/// | [`upsert_record`](RecordStore::upsert_record) | Create or overwrite a record |
/// | [`update_content`](RecordStore::update_content) | Swap hash, body and timestamp |
/// | [`update_source`](RecordStore::update_source) | Record provenance for an existing record |
/// | [`touch_verified`](RecordStore::touch_verified) | Stamp a record still at a known hash |
/// | [`delete_record`](RecordStore::delete_record) | Remove a record |
/// | [`records_indexed_before`](RecordStore::records_indexed_before) | Sweep candidates |
/// | [`register_pds`](RecordStore::register_pds) | Add a PDS to the registry |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, uri: &str) -> Result<Option<IndexedRecord>>;

    async fn upsert_record(&self, record: &IndexedRecord) -> Result<()>;

    /// Replace hash, body and `indexed_at` in one write.
    ///
    /// Returns `false` if no record exists for `uri`.
    async fn update_content(
        &self,
        uri: &str,
        content_hash: &str,
        record_json: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set hash, endpoint and `indexed_at` on an existing record.
    ///
    /// Returns `false` if no record exists for `uri`; never creates one.
    async fn update_source(
        &self,
        uri: &str,
        content_hash: &str,
        pds_endpoint: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set `indexed_at` only if the stored hash is still `expected_hash`.
    ///
    /// Returns `false` if the record is gone or its hash has moved on.
    async fn touch_verified(
        &self,
        uri: &str,
        expected_hash: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns `false` if nothing was deleted.
    async fn delete_record(&self, uri: &str) -> Result<bool>;

    /// Records with `indexed_at < cutoff`, oldest first.
    async fn records_indexed_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IndexedRecord>>;

    /// Idempotent; re-registering keeps the original `registered_at`.
    async fn register_pds(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()>;

    async fn list_pds(&self) -> Result<Vec<PdsRegistration>>;

    /// Stamp `last_swept_at` on a registered endpoint. Unknown endpoints
    /// are ignored.
    async fn mark_pds_swept(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Durable destination for aggregate metric snapshots.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn persist_snapshot(&self, metrics: &AggregatedMetrics, at: DateTime<Utc>)
        -> Result<()>;
}
