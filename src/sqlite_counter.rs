//! SQLite-backed [`CounterStore`].
//!
//! | Table | Holds |
//! |-------|-------|
//! | `counter_keys` | every live key and its optional expiry |
//! | `counters` | integer counters |
//! | `hll_registers` | dense HyperLogLog registers, one row per non-zero register |
//! | `hll_sparse` | exact member hashes while a HyperLogLog is small |
//! | `zset_entries` | scored-set members |
//!
//! A pipeline runs in one transaction whose first statement purges expired
//! keys. That statement is a write, so the transaction holds the write lock
//! from its start and concurrent pipelines serialize instead of failing on
//! a lock upgrade.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use eprint_index_core::hll::{self, REGISTER_COUNT, SPARSE_LIMIT};
use eprint_index_core::store::{CounterOp, CounterPipeline, CounterRead, CounterStore};

pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const VALUE_TABLES: [&str; 4] = ["counters", "hll_registers", "hll_sparse", "zset_entries"];

async fn purge_expired(tx: &mut Transaction<'_, Sqlite>, now_ms: i64) -> Result<()> {
    for table in VALUE_TABLES {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE key IN
             (SELECT key FROM counter_keys WHERE expires_at IS NOT NULL AND expires_at <= ?)",
            table
        ))
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query("DELETE FROM counter_keys WHERE expires_at IS NOT NULL AND expires_at <= ?")
        .bind(now_ms)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn delete_key(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<()> {
    for table in VALUE_TABLES {
        sqlx::query(&format!("DELETE FROM {} WHERE key = ?", table))
            .bind(key)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query("DELETE FROM counter_keys WHERE key = ?")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn touch_key(tx: &mut Transaction<'_, Sqlite>, key: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO counter_keys (key, expires_at) VALUES (?, NULL)")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn apply_op(tx: &mut Transaction<'_, Sqlite>, op: &CounterOp, now_ms: i64) -> Result<()> {
    match op {
        CounterOp::IncrBy { key, delta } => {
            touch_key(tx, key).await?;
            sqlx::query(
                "INSERT INTO counters (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
            )
            .bind(key)
            .bind(*delta)
            .execute(&mut **tx)
            .await?;
        }
        CounterOp::PfAdd { key, member } => {
            touch_key(tx, key).await?;
            let hash = hll::hash_member(member);
            let (idx, rank) = hll::register_for(hash);

            // Keep at most SPARSE_LIMIT + 1 exact hashes; more than
            // SPARSE_LIMIT means the sketch has gone dense.
            sqlx::query(
                "INSERT OR IGNORE INTO hll_sparse (key, hash)
                 SELECT ?, ? WHERE (SELECT COUNT(*) FROM hll_sparse WHERE key = ?) <= ?",
            )
            .bind(key)
            .bind(hash as i64)
            .bind(key)
            .bind(SPARSE_LIMIT as i64)
            .execute(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT INTO hll_registers (key, idx, reg_rank) VALUES (?, ?, ?)
                 ON CONFLICT(key, idx) DO UPDATE SET reg_rank = MAX(reg_rank, excluded.reg_rank)",
            )
            .bind(key)
            .bind(idx as i64)
            .bind(i64::from(rank))
            .execute(&mut **tx)
            .await?;
        }
        CounterOp::ZAdd { key, member, score } => {
            touch_key(tx, key).await?;
            sqlx::query(
                "INSERT INTO zset_entries (key, member, score) VALUES (?, ?, ?)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
            )
            .bind(key)
            .bind(member)
            .bind(*score)
            .execute(&mut **tx)
            .await?;
        }
        CounterOp::ZRemRangeByScore { key, max_score } => {
            sqlx::query("DELETE FROM zset_entries WHERE key = ? AND score <= ?")
                .bind(key)
                .bind(*max_score)
                .execute(&mut **tx)
                .await?;
            // An emptied set stops existing.
            sqlx::query(
                "DELETE FROM counter_keys WHERE key = ?
                 AND NOT EXISTS (SELECT 1 FROM zset_entries WHERE key = ?)
                 AND NOT EXISTS (SELECT 1 FROM counters WHERE key = ?)
                 AND NOT EXISTS (SELECT 1 FROM hll_registers WHERE key = ?)",
            )
            .bind(key)
            .bind(key)
            .bind(key)
            .bind(key)
            .execute(&mut **tx)
            .await?;
        }
        CounterOp::ExpireAt { key, at_ms } => {
            if *at_ms <= now_ms {
                delete_key(tx, key).await?;
            } else {
                sqlx::query("UPDATE counter_keys SET expires_at = ? WHERE key = ?")
                    .bind(*at_ms)
                    .bind(key)
                    .execute(&mut **tx)
                    .await?;
            }
        }
    }
    Ok(())
}

const LIVE: &str = "EXISTS (SELECT 1 FROM counter_keys k
                    WHERE k.key = ? AND (k.expires_at IS NULL OR k.expires_at > ?))";

async fn read_one(
    tx: &mut Transaction<'_, Sqlite>,
    read: &CounterRead,
    now_ms: i64,
) -> Result<i64> {
    match read {
        CounterRead::Get { key } => {
            let value: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT value FROM counters WHERE key = ? AND {}",
                LIVE
            ))
            .bind(key)
            .bind(key)
            .bind(now_ms)
            .fetch_optional(&mut **tx)
            .await?;
            Ok(value.unwrap_or(0))
        }
        CounterRead::PfCount { key } => {
            let sparse: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM hll_sparse WHERE key = ? AND {}",
                LIVE
            ))
            .bind(key)
            .bind(key)
            .bind(now_ms)
            .fetch_one(&mut **tx)
            .await?;
            if sparse <= SPARSE_LIMIT as i64 {
                return Ok(sparse);
            }

            let rows = sqlx::query("SELECT idx, reg_rank FROM hll_registers WHERE key = ?")
                .bind(key)
                .fetch_all(&mut **tx)
                .await?;
            let mut registers = vec![0u8; REGISTER_COUNT];
            for row in &rows {
                let idx: i64 = row.get("idx");
                let rank: i64 = row.get("reg_rank");
                if let Some(slot) = usize::try_from(idx).ok().and_then(|i| registers.get_mut(i)) {
                    *slot = u8::try_from(rank).unwrap_or(u8::MAX);
                }
            }
            Ok(hll::estimate(&registers) as i64)
        }
        CounterRead::ZCount { key, min, max } => {
            let n: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM zset_entries WHERE key = ? AND score >= ? AND score <= ? AND {}",
                LIVE
            ))
            .bind(key)
            .bind(*min)
            .bind(*max)
            .bind(key)
            .bind(now_ms)
            .fetch_one(&mut **tx)
            .await?;
            Ok(n)
        }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn exec(&self, pipeline: CounterPipeline) -> Result<()> {
        if pipeline.is_empty() {
            return Ok(());
        }
        let now_ms = pipeline.now_ms();
        let mut tx = self.pool.begin().await?;
        purge_expired(&mut tx, now_ms).await?;
        for op in pipeline.ops() {
            apply_op(&mut tx, op, now_ms).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read(&self, reads: &[CounterRead], now_ms: i64) -> Result<Vec<i64>> {
        // One transaction gives every read the same snapshot.
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(reads.len());
        for read in reads {
            out.push(read_one(&mut tx, read, now_ms).await?);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn scan_keys(&self, prefix: &str, now_ms: i64) -> Result<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM counter_keys
             WHERE substr(key, 1, ?) = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY key",
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}
