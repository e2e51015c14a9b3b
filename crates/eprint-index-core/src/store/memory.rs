//! In-memory store implementations for tests and embedded use.
//!
//! Each store keeps its state behind a single `std::sync::RwLock`, so every
//! trait call is atomic with respect to every other call on the same store.
//! The counter store stages a whole pipeline before committing it, which
//! keeps a failing pipeline from leaving partial writes behind.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::hll::HyperLogLog;
use crate::models::{AggregatedMetrics, CitationEdge, IndexedRecord, PdsRegistration};

use super::{
    CitationBatch, CounterOp, CounterPipeline, CounterRead, CounterStore, EntityKind, GraphStore,
    MetricsSink, RecordStore,
};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

// ============ Records ============

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, IndexedRecord>>,
    pds: RwLock<BTreeMap<String, PdsRegistration>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_record(&self, uri: &str) -> Result<Option<IndexedRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(uri).cloned())
    }

    async fn upsert_record(&self, record: &IndexedRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.uri.clone(), record.clone());
        Ok(())
    }

    async fn update_content(
        &self,
        uri: &str,
        content_hash: &str,
        record_json: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.get_mut(uri) {
            Some(r) => {
                r.content_hash = content_hash.to_string();
                r.record_json = record_json.to_string();
                r.indexed_at = indexed_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_source(
        &self,
        uri: &str,
        content_hash: &str,
        pds_endpoint: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.get_mut(uri) {
            Some(r) => {
                r.content_hash = content_hash.to_string();
                r.pds_endpoint = pds_endpoint.to_string();
                r.indexed_at = indexed_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_verified(
        &self,
        uri: &str,
        expected_hash: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.get_mut(uri) {
            Some(r) if r.content_hash == expected_hash => {
                r.indexed_at = indexed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_record(&self, uri: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(poisoned)?;
        Ok(records.remove(uri).is_some())
    }

    async fn records_indexed_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IndexedRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut stale: Vec<IndexedRecord> = records
            .values()
            .filter(|r| r.indexed_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at).then_with(|| a.uri.cmp(&b.uri)));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn register_pds(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()> {
        let mut pds = self.pds.write().map_err(poisoned)?;
        pds.entry(endpoint.to_string())
            .or_insert_with(|| PdsRegistration {
                endpoint: endpoint.to_string(),
                registered_at: at,
                last_swept_at: None,
            });
        Ok(())
    }

    async fn list_pds(&self) -> Result<Vec<PdsRegistration>> {
        let pds = self.pds.read().map_err(poisoned)?;
        Ok(pds.values().cloned().collect())
    }

    async fn mark_pds_swept(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()> {
        let mut pds = self.pds.write().map_err(poisoned)?;
        if let Some(reg) = pds.get_mut(endpoint) {
            reg.last_swept_at = Some(at);
        }
        Ok(())
    }
}

// ============ Counters ============

#[derive(Debug, Clone)]
enum CounterValue {
    Int(i64),
    Hll(HyperLogLog),
    ZSet(HashMap<String, i64>),
}

impl CounterValue {
    fn type_name(&self) -> &'static str {
        match self {
            CounterValue::Int(_) => "counter",
            CounterValue::Hll(_) => "hyperloglog",
            CounterValue::ZSet(_) => "sorted set",
        }
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: CounterValue,
    expires_at: Option<i64>,
}

impl CounterEntry {
    fn new(value: CounterValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(true, |at| now_ms < at)
    }
}

fn wrong_type(key: &str, found: &CounterValue, wanted: &str) -> anyhow::Error {
    anyhow!(
        "WRONGTYPE: key '{}' holds a {}, not a {}",
        key,
        found.type_name(),
        wanted
    )
}

/// Counter store backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryCounterStore {
    keys: RwLock<HashMap<String, CounterEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_op(slot: &mut Option<CounterEntry>, op: &CounterOp, now_ms: i64) -> Result<()> {
    match op {
        CounterOp::IncrBy { key, delta } => {
            let entry = slot.get_or_insert_with(|| CounterEntry::new(CounterValue::Int(0)));
            match &mut entry.value {
                CounterValue::Int(n) => {
                    *n = n
                        .checked_add(*delta)
                        .ok_or_else(|| anyhow!("counter '{}' would overflow", key))?;
                }
                other => return Err(wrong_type(key, other, "counter")),
            }
        }
        CounterOp::PfAdd { key, member } => {
            let entry = slot.get_or_insert_with(|| {
                CounterEntry::new(CounterValue::Hll(HyperLogLog::new()))
            });
            match &mut entry.value {
                CounterValue::Hll(h) => {
                    h.add(member);
                }
                other => return Err(wrong_type(key, other, "hyperloglog")),
            }
        }
        CounterOp::ZAdd { key, member, score } => {
            let entry =
                slot.get_or_insert_with(|| CounterEntry::new(CounterValue::ZSet(HashMap::new())));
            match &mut entry.value {
                CounterValue::ZSet(set) => {
                    set.insert(member.clone(), *score);
                }
                other => return Err(wrong_type(key, other, "sorted set")),
            }
        }
        CounterOp::ZRemRangeByScore { key, max_score } => {
            let now_empty = match slot.as_mut() {
                Some(entry) => match &mut entry.value {
                    CounterValue::ZSet(set) => {
                        set.retain(|_, score| *score > *max_score);
                        set.is_empty()
                    }
                    other => return Err(wrong_type(key, other, "sorted set")),
                },
                None => false,
            };
            if now_empty {
                *slot = None;
            }
        }
        CounterOp::ExpireAt { at_ms, .. } => {
            if *at_ms <= now_ms {
                *slot = None;
            } else if let Some(entry) = slot.as_mut() {
                entry.expires_at = Some(*at_ms);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn exec(&self, pipeline: CounterPipeline) -> Result<()> {
        let now_ms = pipeline.now_ms();
        let mut keys = self.keys.write().map_err(poisoned)?;

        // Stage touched keys so a failing op leaves the store untouched.
        let mut staged: HashMap<String, Option<CounterEntry>> = HashMap::new();
        for op in pipeline.ops() {
            let slot = staged.entry(op.key().to_string()).or_insert_with(|| {
                keys.get(op.key())
                    .filter(|e| e.is_live(now_ms))
                    .cloned()
            });
            apply_op(slot, op, now_ms)?;
        }

        for (key, slot) in staged {
            match slot {
                Some(entry) => {
                    keys.insert(key, entry);
                }
                None => {
                    keys.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn read(&self, reads: &[CounterRead], now_ms: i64) -> Result<Vec<i64>> {
        let keys = self.keys.read().map_err(poisoned)?;
        let live = |key: &str| keys.get(key).filter(|e| e.is_live(now_ms));

        let mut out = Vec::with_capacity(reads.len());
        for read in reads {
            let value = match read {
                CounterRead::Get { key } => match live(key).map(|e| &e.value) {
                    None => 0,
                    Some(CounterValue::Int(n)) => *n,
                    Some(other) => return Err(wrong_type(key, other, "counter")),
                },
                CounterRead::PfCount { key } => match live(key).map(|e| &e.value) {
                    None => 0,
                    Some(CounterValue::Hll(h)) => h.count() as i64,
                    Some(other) => return Err(wrong_type(key, other, "hyperloglog")),
                },
                CounterRead::ZCount { key, min, max } => match live(key).map(|e| &e.value) {
                    None => 0,
                    Some(CounterValue::ZSet(set)) => set
                        .values()
                        .filter(|score| **score >= *min && **score <= *max)
                        .count() as i64,
                    Some(other) => return Err(wrong_type(key, other, "sorted set")),
                },
            };
            out.push(value);
        }
        Ok(out)
    }

    async fn scan_keys(&self, prefix: &str, now_ms: i64) -> Result<Vec<String>> {
        let keys = self.keys.read().map_err(poisoned)?;
        let mut found: Vec<String> = keys
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        found.sort();
        Ok(found)
    }
}

// ============ Graph ============

struct StoredEdge {
    is_influential: bool,
    source: String,
    discovered_at: DateTime<Utc>,
}

#[derive(Default)]
struct GraphState {
    entities: HashMap<String, EntityKind>,
    /// Keyed by `(citing_uri, cited_uri)`.
    edges: BTreeMap<(String, String), StoredEdge>,
}

impl GraphState {
    fn edge(&self, citing: &str, cited: &str, e: &StoredEdge) -> CitationEdge {
        CitationEdge {
            citing_uri: citing.to_string(),
            cited_uri: cited.to_string(),
            is_influential: e.is_influential,
            source: e.source.clone(),
            discovered_at: e.discovered_at,
        }
    }

    fn is_entity(&self, uri: &str, kind: EntityKind) -> bool {
        self.entities.get(uri) == Some(&kind)
    }
}

/// Graph store over a `BTreeMap` of edges.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().map(|s| s.edges.len()).unwrap_or(0)
    }
}

fn page(edges: Vec<CitationEdge>, limit: u32, offset: u32) -> Vec<CitationEdge> {
    edges
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, uri: &str, kind: EntityKind) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.entities.insert(uri.to_string(), kind);
        Ok(())
    }

    async fn remove_entity(&self, uri: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        let existed = state.entities.remove(uri).is_some();
        state
            .edges
            .retain(|(citing, cited), _| citing != uri && cited != uri);
        Ok(existed)
    }

    async fn entity_exists(&self, uri: &str, kind: EntityKind) -> Result<bool> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.is_entity(uri, kind))
    }

    async fn merge_citations(&self, batch: CitationBatch) -> Result<usize> {
        let mut state = self.state.write().map_err(poisoned)?;
        let discovered_at = batch.discovered_at();
        let mut merged = 0;

        for c in batch.edges() {
            if !state.is_entity(&c.citing_uri, EntityKind::Eprint)
                || !state.is_entity(&c.cited_uri, EntityKind::Eprint)
            {
                continue;
            }
            state
                .edges
                .entry((c.citing_uri.clone(), c.cited_uri.clone()))
                .and_modify(|e| {
                    e.is_influential = c.is_influential;
                    e.source = c.source.clone();
                })
                .or_insert_with(|| StoredEdge {
                    is_influential: c.is_influential,
                    source: c.source.clone(),
                    discovered_at,
                });
            merged += 1;
        }
        Ok(merged)
    }

    async fn citing(&self, uri: &str, limit: u32, offset: u32) -> Result<Vec<CitationEdge>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut edges: Vec<CitationEdge> = state
            .edges
            .iter()
            .filter(|((_, cited), _)| cited == uri)
            .map(|((citing, cited), e)| state.edge(citing, cited, e))
            .collect();
        edges.sort_by(|a, b| {
            b.discovered_at
                .cmp(&a.discovered_at)
                .then_with(|| a.citing_uri.cmp(&b.citing_uri))
        });
        Ok(page(edges, limit, offset))
    }

    async fn count_citing(&self, uri: &str) -> Result<u64> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.edges.keys().filter(|(_, cited)| cited == uri).count() as u64)
    }

    async fn references(
        &self,
        uri: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CitationEdge>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut edges: Vec<CitationEdge> = state
            .edges
            .iter()
            .filter(|((citing, _), _)| citing == uri)
            .map(|((citing, cited), e)| state.edge(citing, cited, e))
            .collect();
        edges.sort_by(|a, b| {
            b.discovered_at
                .cmp(&a.discovered_at)
                .then_with(|| a.cited_uri.cmp(&b.cited_uri))
        });
        Ok(page(edges, limit, offset))
    }

    async fn count_references(&self, uri: &str) -> Result<u64> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.edges.keys().filter(|(citing, _)| citing == uri).count() as u64)
    }

    async fn delete_citations_for(&self, uri: &str) -> Result<u64> {
        let mut state = self.state.write().map_err(poisoned)?;
        let before = state.edges.len();
        state
            .edges
            .retain(|(citing, cited), _| citing != uri && cited != uri);
        Ok((before - state.edges.len()) as u64)
    }
}

// ============ Metrics sink ============

/// Keeps the latest snapshot per subject. Subjects added with
/// [`fail_for`](InMemoryMetricsSink::fail_for) reject their writes.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    snapshots: RwLock<HashMap<String, AggregatedMetrics>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, uri: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(uri.to_string());
        }
    }

    pub fn snapshot(&self, uri: &str) -> Option<AggregatedMetrics> {
        self.snapshots.read().ok()?.get(uri).cloned()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn persist_snapshot(
        &self,
        metrics: &AggregatedMetrics,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        if self.failing.read().map_err(poisoned)?.contains(&metrics.uri) {
            bail!("snapshot write rejected for {}", metrics.uri);
        }
        let mut snapshots = self.snapshots.write().map_err(poisoned)?;
        snapshots.insert(metrics.uri.clone(), metrics.clone());
        Ok(())
    }
}
