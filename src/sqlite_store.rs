//! SQLite-backed [`RecordStore`] and [`MetricsSink`].
//!
//! Both write to the tables created by [`crate::migrate`]: `indexed_records`,
//! `pds_registry` and `metric_snapshots`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use eprint_index_core::models::{AggregatedMetrics, IndexedRecord, PdsRegistration};
use eprint_index_core::store::{MetricsSink, RecordStore};

/// SQLite implementation of [`RecordStore`].
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn record_from_row(row: &SqliteRow) -> Result<IndexedRecord> {
    Ok(IndexedRecord {
        uri: row.get("uri"),
        content_hash: row.get("cid"),
        pds_endpoint: row.get("pds_endpoint"),
        record_type: row.get("record_type"),
        record_json: row.get("record_json"),
        indexed_at: from_millis(row.get("indexed_at"))?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_record(&self, uri: &str) -> Result<Option<IndexedRecord>> {
        let row = sqlx::query(
            "SELECT uri, cid, pds_endpoint, record_type, record_json, indexed_at
             FROM indexed_records WHERE uri = ?",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert_record(&self, record: &IndexedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexed_records (uri, cid, pds_endpoint, record_type, record_json, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                cid = excluded.cid,
                pds_endpoint = excluded.pds_endpoint,
                record_type = excluded.record_type,
                record_json = excluded.record_json,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&record.uri)
        .bind(&record.content_hash)
        .bind(&record.pds_endpoint)
        .bind(&record.record_type)
        .bind(&record.record_json)
        .bind(record.indexed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_content(
        &self,
        uri: &str,
        content_hash: &str,
        record_json: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE indexed_records SET cid = ?, record_json = ?, indexed_at = ? WHERE uri = ?",
        )
        .bind(content_hash)
        .bind(record_json)
        .bind(indexed_at.timestamp_millis())
        .bind(uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_source(
        &self,
        uri: &str,
        content_hash: &str,
        pds_endpoint: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE indexed_records SET cid = ?, pds_endpoint = ?, indexed_at = ? WHERE uri = ?",
        )
        .bind(content_hash)
        .bind(pds_endpoint)
        .bind(indexed_at.timestamp_millis())
        .bind(uri)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_verified(
        &self,
        uri: &str,
        expected_hash: &str,
        indexed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE indexed_records SET indexed_at = ? WHERE uri = ? AND cid = ?")
                .bind(indexed_at.timestamp_millis())
                .bind(uri)
                .bind(expected_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_record(&self, uri: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM indexed_records WHERE uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn records_indexed_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IndexedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT uri, cid, pds_endpoint, record_type, record_json, indexed_at
            FROM indexed_records
            WHERE indexed_at < ?
            ORDER BY indexed_at ASC, uri ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff.timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn register_pds(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO pds_registry (endpoint, registered_at) VALUES (?, ?)
             ON CONFLICT(endpoint) DO NOTHING",
        )
        .bind(endpoint)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pds(&self) -> Result<Vec<PdsRegistration>> {
        let rows = sqlx::query(
            "SELECT endpoint, registered_at, last_swept_at FROM pds_registry ORDER BY endpoint",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PdsRegistration {
                    endpoint: row.get("endpoint"),
                    registered_at: from_millis(row.get("registered_at"))?,
                    last_swept_at: row
                        .get::<Option<i64>, _>("last_swept_at")
                        .map(from_millis)
                        .transpose()?,
                })
            })
            .collect()
    }

    async fn mark_pds_swept(&self, endpoint: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE pds_registry SET last_swept_at = ? WHERE endpoint = ?")
            .bind(at.timestamp_millis())
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Upserts one row per subject into `metric_snapshots`.
pub struct SqliteMetricsSink {
    pool: SqlitePool,
}

impl SqliteMetricsSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetricsSink for SqliteMetricsSink {
    async fn persist_snapshot(&self, m: &AggregatedMetrics, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metric_snapshots (uri, total_views, unique_views, total_downloads,
                                          unique_downloads, views_24h, views_7d, views_30d,
                                          search_clicks, search_downloads, dwell_time_samples,
                                          avg_dwell_time_ms, flushed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                total_views = excluded.total_views,
                unique_views = excluded.unique_views,
                total_downloads = excluded.total_downloads,
                unique_downloads = excluded.unique_downloads,
                views_24h = excluded.views_24h,
                views_7d = excluded.views_7d,
                views_30d = excluded.views_30d,
                search_clicks = excluded.search_clicks,
                search_downloads = excluded.search_downloads,
                dwell_time_samples = excluded.dwell_time_samples,
                avg_dwell_time_ms = excluded.avg_dwell_time_ms,
                flushed_at = excluded.flushed_at
            "#,
        )
        .bind(&m.uri)
        .bind(to_i64(m.total_views))
        .bind(to_i64(m.unique_views))
        .bind(to_i64(m.total_downloads))
        .bind(to_i64(m.unique_downloads))
        .bind(to_i64(m.views_24h))
        .bind(to_i64(m.views_7d))
        .bind(to_i64(m.views_30d))
        .bind(to_i64(m.search_clicks))
        .bind(to_i64(m.search_downloads))
        .bind(to_i64(m.dwell_time_samples))
        .bind(m.avg_dwell_time_ms.map(to_i64))
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
