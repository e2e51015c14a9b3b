//! Counter store: plain counters, HyperLogLogs and scored sets with
//! per-key expiry.
//!
//! Mutations are never issued one by one. Callers accumulate them in a
//! [`CounterPipeline`] and hand the whole pipeline to
//! [`CounterStore::exec`], which applies it atomically: a concurrent reader
//! sees either none of it or all of it.
//!
//! A key is live while `now_ms < expires_at` (or it has no expiry). Expired
//! keys read as absent, and a write to an expired key starts from empty.

use anyhow::Result;
use async_trait::async_trait;

/// One mutation inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOp {
    IncrBy { key: String, delta: i64 },
    PfAdd { key: String, member: String },
    /// Insert or rescore `member`.
    ZAdd { key: String, member: String, score: i64 },
    /// Remove every member with `score <= max_score`.
    ZRemRangeByScore { key: String, max_score: i64 },
    ExpireAt { key: String, at_ms: i64 },
}

impl CounterOp {
    pub fn key(&self) -> &str {
        match self {
            CounterOp::IncrBy { key, .. }
            | CounterOp::PfAdd { key, .. }
            | CounterOp::ZAdd { key, .. }
            | CounterOp::ZRemRangeByScore { key, .. }
            | CounterOp::ExpireAt { key, .. } => key,
        }
    }
}

/// One read inside a batched read. Every read yields one integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterRead {
    /// Counter value, 0 if absent.
    Get { key: String },
    /// Cardinality estimate, 0 if absent.
    PfCount { key: String },
    /// Members with `min <= score <= max`, 0 if absent.
    ZCount { key: String, min: i64, max: i64 },
}

/// Accumulates mutations for one atomic [`CounterStore::exec`].
///
/// ```
/// use eprint_index_core::store::CounterPipeline;
///
/// let mut p = CounterPipeline::new(1_000);
/// p.incr("views:at://a/b/c").pfadd("unique:at://a/b/c", "did:plc:x");
/// assert_eq!(p.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPipeline {
    now_ms: i64,
    ops: Vec<CounterOp>,
}

impl CounterPipeline {
    /// `now_ms` is the instant the pipeline is applied at; it decides which
    /// keys count as expired.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms,
            ops: Vec::new(),
        }
    }

    pub fn incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.incr_by(key, 1)
    }

    pub fn incr_by(&mut self, key: impl Into<String>, delta: i64) -> &mut Self {
        self.ops.push(CounterOp::IncrBy {
            key: key.into(),
            delta,
        });
        self
    }

    pub fn pfadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(CounterOp::PfAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: i64,
    ) -> &mut Self {
        self.ops.push(CounterOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem_range_by_score(&mut self, key: impl Into<String>, max_score: i64) -> &mut Self {
        self.ops.push(CounterOp::ZRemRangeByScore {
            key: key.into(),
            max_score,
        });
        self
    }

    pub fn expire_at(&mut self, key: impl Into<String>, at_ms: i64) -> &mut Self {
        self.ops.push(CounterOp::ExpireAt {
            key: key.into(),
            at_ms,
        });
        self
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn ops(&self) -> &[CounterOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<CounterOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Start an empty pipeline bound to `now_ms`.
    fn pipeline(&self, now_ms: i64) -> CounterPipeline {
        CounterPipeline::new(now_ms)
    }

    /// Apply every op in the pipeline atomically, in order.
    async fn exec(&self, pipeline: CounterPipeline) -> Result<()>;

    /// Evaluate all reads against one consistent view, in one round-trip.
    /// The result has one entry per read, in order.
    async fn read(&self, reads: &[CounterRead], now_ms: i64) -> Result<Vec<i64>>;

    /// Live keys starting with `prefix`, sorted.
    async fn scan_keys(&self, prefix: &str, now_ms: i64) -> Result<Vec<String>>;
}
