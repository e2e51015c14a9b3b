//! `epx index|delete|check|refresh|sweep|pds` commands.

use anyhow::{Context, Result};

use crate::appview::AppView;
use crate::config::Config;

pub async fn run_index(cfg: &Config, uri: &str, pds: Option<&str>) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let record = app
        .index(uri, pds)
        .await
        .with_context(|| format!("Failed to index {}", uri))?;
    println!("Indexed {} ({})", uri, record.record_type());
    app.close().await;
    Ok(())
}

pub async fn run_delete(cfg: &Config, uri: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    app.delete(uri)
        .await
        .with_context(|| format!("Failed to delete {}", uri))?;
    println!("Deleted {}", uri);
    app.close().await;
    Ok(())
}

/// Print the staleness result as JSON. Fetch problems are part of the
/// result, not a command failure.
pub async fn run_check(cfg: &Config, uri: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let result = app.sync.check_staleness(uri).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    app.close().await;
    Ok(())
}

pub async fn run_refresh(cfg: &Config, uri: &str, retry: bool) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let outcome = if retry {
        let sync = &app.sync;
        app.retry_policy()
            .run(move || async move { sync.refresh_record(uri).await })
            .await
    } else {
        app.sync.refresh_record(uri).await
    };

    match outcome {
        Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Err(e) => {
            let body = serde_json::json!({
                "error": { "code": e.code(), "message": e.to_string() }
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            app.close().await;
            return Err(e).with_context(|| format!("Failed to refresh {}", uri));
        }
    }
    app.close().await;
    Ok(())
}

pub async fn run_sweep(
    cfg: &Config,
    max_age_secs: Option<u64>,
    limit: Option<usize>,
) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let max_age_secs = max_age_secs.unwrap_or(cfg.sync.stale_after_secs);
    let max_age_ms = i64::try_from(max_age_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    let limit = limit.unwrap_or(cfg.sync.sweep_limit);

    let report = app.sync.sweep_stale(max_age_ms, limit).await?;
    println!("Sweep complete:");
    println!("  examined:  {}", report.examined);
    println!("  refreshed: {}", report.refreshed);
    println!("  changed:   {}", report.changed);
    println!("  not found: {}", report.not_found);
    println!("  failed:    {}", report.failed);
    app.close().await;
    Ok(())
}

pub async fn run_pds_add(cfg: &Config, url: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let endpoint = app.sync.register_pds(url).await?;
    println!("Registered {}", endpoint);
    app.close().await;
    Ok(())
}

pub async fn run_pds_list(cfg: &Config) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let registrations = app.sync.list_pds().await?;

    if registrations.is_empty() {
        println!("No PDS registered.");
    } else {
        println!("{:<48} {:<20} LAST SWEPT", "ENDPOINT", "REGISTERED");
        println!("{}", "-".repeat(88));
        for r in &registrations {
            let swept = r
                .last_swept_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "{:<48} {:<20} {}",
                r.endpoint,
                r.registered_at.format("%Y-%m-%d %H:%M"),
                swept
            );
        }
    }
    app.close().await;
    Ok(())
}
