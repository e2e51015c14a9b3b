//! Idempotent schema setup for all three stores.
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Primary store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexed_records (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            pds_endpoint TEXT NOT NULL,
            record_type TEXT NOT NULL,
            record_json TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pds_registry (
            endpoint TEXT PRIMARY KEY,
            registered_at INTEGER NOT NULL,
            last_swept_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_snapshots (
            uri TEXT PRIMARY KEY,
            total_views INTEGER NOT NULL,
            unique_views INTEGER NOT NULL,
            total_downloads INTEGER NOT NULL,
            unique_downloads INTEGER NOT NULL,
            views_24h INTEGER NOT NULL,
            views_7d INTEGER NOT NULL,
            views_30d INTEGER NOT NULL,
            search_clicks INTEGER NOT NULL,
            search_downloads INTEGER NOT NULL,
            dwell_time_samples INTEGER NOT NULL,
            avg_dwell_time_ms INTEGER,
            flushed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Counter store. `counter_keys` owns existence and expiry; the value
    // tables hold the data for each key kind.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counter_keys (
            key TEXT PRIMARY KEY,
            expires_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hll_registers (
            key TEXT NOT NULL,
            idx INTEGER NOT NULL,
            reg_rank INTEGER NOT NULL,
            PRIMARY KEY (key, idx)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hll_sparse (
            key TEXT NOT NULL,
            hash INTEGER NOT NULL,
            PRIMARY KEY (key, hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS zset_entries (
            key TEXT NOT NULL,
            member TEXT NOT NULL,
            score INTEGER NOT NULL,
            PRIMARY KEY (key, member)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Graph store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_entities (
            uri TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS citations (
            citing_uri TEXT NOT NULL,
            cited_uri TEXT NOT NULL,
            is_influential INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            discovered_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (citing_uri, cited_uri)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_indexed_records_indexed_at ON indexed_records(indexed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_counter_keys_expires_at ON counter_keys(expires_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_zset_entries_score ON zset_entries(key, score)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_citations_cited ON citations(cited_uri, discovered_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
