//! Database statistics and health overview.
//!
//! A quick summary of what each store holds: indexed records by type,
//! registered PDS endpoints, live counter keys, and the citation graph.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let now = chrono::Utc::now().timestamp_millis();

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_records")
        .fetch_one(&pool)
        .await?;

    let pds_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pds_registry")
        .fetch_one(&pool)
        .await?;

    let live_keys: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM counter_keys WHERE expires_at IS NULL OR expires_at > ?",
    )
    .bind(now)
    .fetch_one(&pool)
    .await?;

    let entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graph_entities")
        .fetch_one(&pool)
        .await?;

    let edges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM citations")
        .fetch_one(&pool)
        .await?;

    let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metric_snapshots")
        .fetch_one(&pool)
        .await?;

    let oldest: Option<i64> = sqlx::query_scalar("SELECT MIN(indexed_at) FROM indexed_records")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Eprint Index: Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", total_records);
    println!(
        "  Oldest:      {}",
        oldest.map(format_age).unwrap_or_else(|| "-".to_string())
    );
    println!("  PDS:         {}", pds_count);
    println!("  Counters:    {} live keys", live_keys);
    println!("  Snapshots:   {}", snapshots);
    println!("  Graph:       {} papers, {} citations", entities, edges);

    let type_rows = sqlx::query(
        r#"
        SELECT record_type, COUNT(*) AS n
        FROM indexed_records
        GROUP BY record_type
        ORDER BY n DESC, record_type ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !type_rows.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<44} {:>8}", "RECORD TYPE", "COUNT");
        println!("  {}", "-".repeat(53));
        for row in &type_rows {
            let record_type: String = row.get("record_type");
            let n: i64 = row.get("n");
            println!("  {:<44} {:>8}", record_type, n);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative age of a millisecond timestamp, e.g. "3 hours ago".
fn format_age(ts_ms: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - ts_ms) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}
