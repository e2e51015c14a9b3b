//! `epx citations ...` commands.

use std::path::Path;

use anyhow::{Context, Result};

use eprint_index_core::models::{NewCitation, PageOptions};

use crate::appview::AppView;
use crate::config::Config;

/// Register a paper URI as a graph entity without indexing its record.
pub async fn run_register(cfg: &Config, uri: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    app.citations.register_paper(uri).await?;
    println!("Registered {}", uri);
    app.close().await;
    Ok(())
}

/// Upsert a JSON array of citations. Edges whose endpoints are not
/// registered are counted as skipped, not reported individually.
pub async fn run_import(cfg: &Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read citations file: {}", path.display()))?;
    let citations: Vec<NewCitation> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse citations file: {}", path.display()))?;

    let app = AppView::open(cfg).await?;
    let outcome = app.citations.upsert_citations_batch(&citations).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    app.close().await;
    Ok(())
}

pub async fn run_citing(
    cfg: &Config,
    uri: &str,
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let page = app
        .citations
        .get_citing_papers(uri, PageOptions { limit, offset })
        .await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    app.close().await;
    Ok(())
}

pub async fn run_references(
    cfg: &Config,
    uri: &str,
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let page = app
        .citations
        .get_references(uri, PageOptions { limit, offset })
        .await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    app.close().await;
    Ok(())
}

pub async fn run_cocited(cfg: &Config, uri: &str, min: u64) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let results = app.citations.find_co_cited_papers(uri, min).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    app.close().await;
    Ok(())
}

pub async fn run_delete(cfg: &Config, uri: &str) -> Result<()> {
    let app = AppView::open(cfg).await?;
    let removed = app.citations.delete_citations_for_paper(uri).await?;
    println!("Deleted {} citations touching {}", removed, uri);
    app.close().await;
    Ok(())
}
