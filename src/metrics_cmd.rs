//! `epx metrics ...` commands.
//!
//! Single-event recording commands exit 0 with no output on success, so
//! they compose in shell loops. `batch` prints the number of events
//! recorded. Read commands print JSON.

use anyhow::{Context, Result};

use eprint_index_core::models::{MetricEvent, TrendWindow};

use crate::appview::AppView;
use crate::config::Config;

pub async fn run_record(cfg: &Config, event: MetricEvent) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let uri = event.subject_uri().to_string();
    app.metrics
        .record(event)
        .await
        .with_context(|| format!("Failed to record event for {}", uri))?;
    app.close().await;
    Ok(())
}

/// Record a batch of events read from a JSON array file.
pub async fn run_record_batch(cfg: &Config, path: &std::path::Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {}", path.display()))?;
    let events: Vec<MetricEvent> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse events file: {}", path.display()))?;

    let app = AppView::open(cfg).await?;
    app.metrics.batch_increment(&events).await?;
    println!("Recorded {} events.", events.len());
    app.close().await;
    Ok(())
}

pub async fn run_show(cfg: &Config, uri: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let metrics = app.metrics.get_metrics(uri).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    app.close().await;
    Ok(())
}

pub async fn run_trending(cfg: &Config, window: &str, limit: usize) -> Result<()> {
    let window: TrendWindow = window.parse()?;
    let app = AppView::open(cfg).await?;
    let entries = app.metrics.get_trending(window, limit).await?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    app.close().await;
    Ok(())
}

pub async fn run_flush(cfg: &Config) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let flushed = app.metrics.flush_to_database().await?;
    println!("Flushed metrics for {} subjects.", flushed);
    app.close().await;
    Ok(())
}
