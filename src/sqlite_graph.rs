//! SQLite-backed [`GraphStore`].
//!
//! Entities live in `graph_entities`, edges in `citations` keyed by
//! `(citing_uri, cited_uri)`. The closed-world check is folded into the
//! insert itself (`INSERT ... SELECT ... WHERE EXISTS`), so a batch needs no
//! read round-trips before it writes.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use eprint_index_core::models::{CitationEdge, CoCitationResult};
use eprint_index_core::store::{CitationBatch, EntityKind, GraphStore};

use crate::sqlite_store::from_millis;

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn edge_from_row(row: &SqliteRow) -> Result<CitationEdge> {
    Ok(CitationEdge {
        citing_uri: row.get("citing_uri"),
        cited_uri: row.get("cited_uri"),
        is_influential: row.get::<i64, _>("is_influential") != 0,
        source: row.get("source"),
        discovered_at: from_millis(row.get("discovered_at"))?,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_entity(&self, uri: &str, kind: EntityKind) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_entities (uri, kind, created_at) VALUES (?, ?, ?)
             ON CONFLICT(uri) DO UPDATE SET kind = excluded.kind",
        )
        .bind(uri)
        .bind(kind.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_entity(&self, uri: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM citations WHERE citing_uri = ? OR cited_uri = ?")
            .bind(uri)
            .bind(uri)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM graph_entities WHERE uri = ?")
            .bind(uri)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn entity_exists(&self, uri: &str, kind: EntityKind) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM graph_entities WHERE uri = ? AND kind = ?",
        )
        .bind(uri)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn merge_citations(&self, batch: CitationBatch) -> Result<usize> {
        let discovered_at = batch.discovered_at().timestamp_millis();
        let kind = EntityKind::Eprint.as_str();
        let mut merged = 0u64;

        let mut tx = self.pool.begin().await?;
        for c in batch.edges() {
            let result = sqlx::query(
                r#"
                INSERT INTO citations (citing_uri, cited_uri, is_influential, source,
                                       discovered_at, updated_at)
                SELECT ?, ?, ?, ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM graph_entities WHERE uri = ? AND kind = ?)
                  AND EXISTS (SELECT 1 FROM graph_entities WHERE uri = ? AND kind = ?)
                ON CONFLICT(citing_uri, cited_uri) DO UPDATE SET
                    is_influential = excluded.is_influential,
                    source = excluded.source,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&c.citing_uri)
            .bind(&c.cited_uri)
            .bind(c.is_influential)
            .bind(&c.source)
            .bind(discovered_at)
            .bind(discovered_at)
            .bind(&c.citing_uri)
            .bind(kind)
            .bind(&c.cited_uri)
            .bind(kind)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    citing = %c.citing_uri,
                    cited = %c.cited_uri,
                    "edge skipped: endpoint not indexed"
                );
            }
            merged += result.rows_affected();
        }
        tx.commit().await?;

        Ok(usize::try_from(merged).unwrap_or(usize::MAX))
    }

    async fn citing(&self, uri: &str, limit: u32, offset: u32) -> Result<Vec<CitationEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT citing_uri, cited_uri, is_influential, source, discovered_at
            FROM citations
            WHERE cited_uri = ?
            ORDER BY discovered_at DESC, citing_uri ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(uri)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn count_citing(&self, uri: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM citations WHERE cited_uri = ?")
            .bind(uri)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn references(
        &self,
        uri: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CitationEdge>> {
        let rows = sqlx::query(
            r#"
            SELECT citing_uri, cited_uri, is_influential, source, discovered_at
            FROM citations
            WHERE citing_uri = ?
            ORDER BY discovered_at DESC, cited_uri ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(uri)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn count_references(&self, uri: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM citations WHERE citing_uri = ?")
            .bind(uri)
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn delete_citations_for(&self, uri: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM citations WHERE citing_uri = ? OR cited_uri = ?")
            .bind(uri)
            .bind(uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn co_cited(&self, uri: &str, min_count: u64) -> Result<Vec<CoCitationResult>> {
        let rows = sqlx::query(
            r#"
            SELECT other.cited_uri AS uri, COUNT(DISTINCT other.citing_uri) AS shared
            FROM citations target
            JOIN citations other ON other.citing_uri = target.citing_uri
            WHERE target.cited_uri = ? AND other.cited_uri != ?
            GROUP BY other.cited_uri
            HAVING COUNT(DISTINCT other.citing_uri) >= ?
            ORDER BY shared DESC, uri ASC
            "#,
        )
        .bind(uri)
        .bind(uri)
        .bind(i64::try_from(min_count).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CoCitationResult {
                uri: row.get("uri"),
                co_citation_count: row.get::<i64, _>("shared").max(0) as u64,
            })
            .collect())
    }
}
