//! Citation graph engine.
//!
//! Maintains directed `citing -> cited` edges between indexed eprints.
//! Writes are idempotent match-or-create keyed by the URI pair, and an edge
//! is only materialized when both endpoints are already registered papers.
//! Edges that fail that check are dropped and counted, never raised:
//! enrichment sources re-run periodically and will resubmit them once both
//! sides are indexed.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{IndexError, IndexResult};
use crate::models::{
    BatchOutcome, CitationEdge, CoCitationResult, NewCitation, PageOptions, PagedCitations,
};
use crate::store::{CitationBatch, EntityKind, GraphStore};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

pub struct CitationEngine {
    graph: Arc<dyn GraphStore>,
    clock: Arc<dyn Clock>,
    default_page_limit: u32,
    max_page_limit: u32,
}

impl CitationEngine {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            clock: Arc::new(SystemClock),
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override page limits. `max` is raised to at least `default`.
    pub fn with_page_limits(mut self, default: u32, max: u32) -> Self {
        self.default_page_limit = default.max(1);
        self.max_page_limit = max.max(self.default_page_limit);
        self
    }

    /// Make `uri` eligible as a citation endpoint.
    pub async fn register_paper(&self, uri: &str) -> IndexResult<()> {
        require_uri(uri)?;
        self.graph.upsert_entity(uri, EntityKind::Eprint).await?;
        tracing::debug!(uri, "registered paper");
        Ok(())
    }

    /// Remove a paper and every edge touching it. Returns `false` if it was
    /// never registered.
    pub async fn remove_paper(&self, uri: &str) -> IndexResult<bool> {
        let removed = self.graph.remove_entity(uri).await?;
        tracing::debug!(uri, removed, "removed paper");
        Ok(removed)
    }

    /// Match-or-create every citation in one graph transaction.
    ///
    /// New edges get `discovered_at = now`; existing edges keep theirs and
    /// take the latest `is_influential` and `source`. Self-citations and
    /// edges with an unregistered endpoint are skipped.
    pub async fn upsert_citations_batch(
        &self,
        citations: &[NewCitation],
    ) -> IndexResult<BatchOutcome> {
        let mut outcome = BatchOutcome {
            submitted: citations.len(),
            ..Default::default()
        };
        if citations.is_empty() {
            return Ok(outcome);
        }

        let mut batch = CitationBatch::new(self.clock.now());
        for c in citations {
            if c.citing_uri.is_empty() || c.cited_uri.is_empty() || c.citing_uri == c.cited_uri {
                continue;
            }
            batch.push(c.clone());
        }

        if !batch.is_empty() {
            outcome.materialized = self.graph.merge_citations(batch).await?;
        }
        outcome.skipped = outcome.submitted - outcome.materialized;

        if outcome.skipped > 0 {
            tracing::debug!(skipped = outcome.skipped, "citations skipped by closed-world rule");
        }
        tracing::info!(
            submitted = outcome.submitted,
            materialized = outcome.materialized,
            "citation batch merged"
        );
        Ok(outcome)
    }

    /// Papers citing `uri`, newest discovery first.
    pub async fn get_citing_papers(
        &self,
        uri: &str,
        options: PageOptions,
    ) -> IndexResult<PagedCitations> {
        let (limit, offset) = self.page(options)?;
        let citations = self.graph.citing(uri, limit, offset).await?;
        let total = self.graph.count_citing(uri).await?;
        Ok(paged(citations, total, offset))
    }

    /// Papers `uri` cites, newest discovery first.
    pub async fn get_references(
        &self,
        uri: &str,
        options: PageOptions,
    ) -> IndexResult<PagedCitations> {
        let (limit, offset) = self.page(options)?;
        let citations = self.graph.references(uri, limit, offset).await?;
        let total = self.graph.count_references(uri).await?;
        Ok(paged(citations, total, offset))
    }

    pub async fn find_co_cited_papers(
        &self,
        uri: &str,
        min_co_citations: u64,
    ) -> IndexResult<Vec<CoCitationResult>> {
        if min_co_citations == 0 {
            return Err(IndexError::validation("minCoCitations must be at least 1"));
        }
        Ok(self.graph.co_cited(uri, min_co_citations).await?)
    }

    /// Remove every edge with `uri` at either end. Returns how many went.
    pub async fn delete_citations_for_paper(&self, uri: &str) -> IndexResult<u64> {
        let removed = self.graph.delete_citations_for(uri).await?;
        tracing::info!(uri, removed, "deleted citations");
        Ok(removed)
    }

    fn page(&self, options: PageOptions) -> IndexResult<(u32, u32)> {
        let limit = options.limit.unwrap_or(self.default_page_limit);
        if limit == 0 || limit > self.max_page_limit {
            return Err(IndexError::validation(format!(
                "limit must be between 1 and {}",
                self.max_page_limit
            )));
        }
        Ok((limit, options.offset.unwrap_or(0)))
    }
}

fn paged(citations: Vec<CitationEdge>, total: u64, offset: u32) -> PagedCitations {
    let has_more = u64::from(offset) + (citations.len() as u64) < total;
    PagedCitations {
        citations,
        total,
        has_more,
    }
}

fn require_uri(uri: &str) -> IndexResult<()> {
    if uri.trim().is_empty() {
        return Err(IndexError::validation("uri must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::InMemoryGraphStore;

    fn cite(from: &str, to: &str, influential: bool, source: &str) -> NewCitation {
        NewCitation {
            citing_uri: from.to_string(),
            cited_uri: to.to_string(),
            is_influential: influential,
            source: source.to_string(),
        }
    }

    async fn engine_with(papers: &[&str]) -> (CitationEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let engine =
            CitationEngine::new(Arc::new(InMemoryGraphStore::new())).with_clock(clock.clone());
        for p in papers {
            engine.register_paper(p).await.unwrap();
        }
        (engine, clock)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_first_discovery() {
        let (engine, clock) = engine_with(&["A", "B"]).await;
        let first_seen = clock.now();

        engine
            .upsert_citations_batch(&[cite("A", "B", false, "x")])
            .await
            .unwrap();
        clock.advance_millis(3_600_000);
        engine
            .upsert_citations_batch(&[cite("A", "B", true, "y")])
            .await
            .unwrap();

        let refs = engine.get_references("A", PageOptions::default()).await.unwrap();
        assert_eq!(refs.total, 1);
        let edge = &refs.citations[0];
        assert!(edge.is_influential);
        assert_eq!(edge.source, "y");
        assert_eq!(edge.discovered_at, first_seen);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_dropped_silently() {
        let (engine, _) = engine_with(&["A"]).await;
        let outcome = engine
            .upsert_citations_batch(&[cite("A", "X", false, "x")])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                submitted: 1,
                materialized: 0,
                skipped: 1
            }
        );
        let refs = engine.get_references("A", PageOptions::default()).await.unwrap();
        assert_eq!(refs.total, 0);
        assert!(refs.citations.is_empty());
    }

    #[tokio::test]
    async fn partial_batch_and_self_citation() {
        let (engine, _) = engine_with(&["A", "B"]).await;
        let outcome = engine
            .upsert_citations_batch(&[
                cite("A", "B", false, "x"),
                cite("A", "A", false, "x"),
                cite("B", "Z", false, "x"),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.materialized, 1);
        assert_eq!(outcome.skipped, 2);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let (engine, _) = engine_with(&[]).await;
        assert_eq!(
            engine.upsert_citations_batch(&[]).await.unwrap(),
            BatchOutcome::default()
        );
    }

    #[tokio::test]
    async fn co_citation_counts_shared_citers() {
        let (engine, _) = engine_with(&["A", "B", "C", "D", "E"]).await;
        engine
            .upsert_citations_batch(&[
                cite("A", "B", false, "x"),
                cite("A", "C", false, "x"),
                cite("D", "B", false, "x"),
                cite("D", "C", false, "x"),
                cite("D", "E", false, "x"),
            ])
            .await
            .unwrap();

        let co = engine.find_co_cited_papers("B", 1).await.unwrap();
        assert_eq!(co[0].uri, "C");
        assert_eq!(co[0].co_citation_count, 2);
        assert!(co.iter().all(|r| r.uri != "B"));
        assert_eq!(co.len(), 2);

        let strong = engine.find_co_cited_papers("B", 2).await.unwrap();
        assert_eq!(strong.len(), 1);

        assert!(matches!(
            engine.find_co_cited_papers("B", 0).await,
            Err(IndexError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn pagination_never_overlaps() {
        let (engine, clock) = engine_with(&["D", "E", "F", "G"]).await;
        for citer in ["E", "F", "G"] {
            engine
                .upsert_citations_batch(&[cite(citer, "D", false, "x")])
                .await
                .unwrap();
            clock.advance_millis(1_000);
        }

        let first = engine
            .get_citing_papers("D", PageOptions::new(2, 0))
            .await
            .unwrap();
        let second = engine
            .get_citing_papers("D", PageOptions::new(2, 2))
            .await
            .unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(second.total, 3);
        assert!(first.has_more);
        assert!(!second.has_more);

        let a: HashSet<_> = first.citations.iter().map(|c| c.citing_uri.clone()).collect();
        let b: HashSet<_> = second.citations.iter().map(|c| c.citing_uri.clone()).collect();
        assert!(a.is_disjoint(&b));
        assert_eq!(a.union(&b).count(), 3);
        // Newest discovery first.
        assert_eq!(first.citations[0].citing_uri, "G");
    }

    #[tokio::test]
    async fn page_limit_is_validated() {
        let (engine, _) = engine_with(&["D"]).await;
        assert!(engine
            .get_citing_papers("D", PageOptions::new(0, 0))
            .await
            .is_err());
        assert!(engine
            .get_references("D", PageOptions::new(101, 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn deleting_citations_reports_count() {
        let (engine, _) = engine_with(&["A", "B", "C"]).await;
        engine
            .upsert_citations_batch(&[
                cite("A", "B", false, "x"),
                cite("B", "C", false, "x"),
                cite("A", "C", false, "x"),
            ])
            .await
            .unwrap();
        assert_eq!(engine.delete_citations_for_paper("B").await.unwrap(), 2);
        assert_eq!(
            engine
                .get_references("A", PageOptions::default())
                .await
                .unwrap()
                .total,
            1
        );
    }

    #[tokio::test]
    async fn removed_paper_no_longer_accepts_edges() {
        let (engine, _) = engine_with(&["A", "B"]).await;
        assert!(engine.remove_paper("B").await.unwrap());
        let outcome = engine
            .upsert_citations_batch(&[cite("A", "B", false, "x")])
            .await
            .unwrap();
        assert_eq!(outcome.materialized, 0);
    }
}
