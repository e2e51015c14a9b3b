//! Graph store: indexed entities and the directed citation edges between
//! them.
//!
//! Edges are keyed by `(citing_uri, cited_uri)`. [`GraphStore::merge_citations`]
//! is match-or-create under the closed-world rule: an edge is written only
//! when both endpoints already exist as [`EntityKind::Eprint`] entities.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CitationEdge, CoCitationResult, NewCitation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Eprint,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Eprint => "eprint",
        }
    }
}

/// Citation facts to merge in one graph transaction.
///
/// `discovered_at` is stamped on edges this batch creates; edges that
/// already exist keep theirs.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationBatch {
    discovered_at: DateTime<Utc>,
    edges: Vec<NewCitation>,
}

impl CitationBatch {
    pub fn new(discovered_at: DateTime<Utc>) -> Self {
        Self {
            discovered_at,
            edges: Vec::new(),
        }
    }

    pub fn push(&mut self, citation: NewCitation) -> &mut Self {
        self.edges.push(citation);
        self
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn edges(&self) -> &[NewCitation] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Labeled directed-graph substrate for citations.
///
/// Listings are ordered by `discovered_at` descending, then by the other
/// endpoint's URI ascending, so offset pages never overlap while the graph
/// is unchanged.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entity(&self, uri: &str, kind: EntityKind) -> Result<()>;

    /// Remove an entity and every edge touching it. Returns `false` if it
    /// did not exist.
    async fn remove_entity(&self, uri: &str) -> Result<bool>;

    async fn entity_exists(&self, uri: &str, kind: EntityKind) -> Result<bool>;

    /// Match-or-create every edge of the batch in one transaction.
    ///
    /// Edges with a missing endpoint are skipped silently. Returns how many
    /// edges were created or updated.
    async fn merge_citations(&self, batch: CitationBatch) -> Result<usize>;

    /// Edges whose `cited_uri` is `uri`.
    async fn citing(&self, uri: &str, limit: u32, offset: u32) -> Result<Vec<CitationEdge>>;

    async fn count_citing(&self, uri: &str) -> Result<u64>;

    /// Edges whose `citing_uri` is `uri`.
    async fn references(&self, uri: &str, limit: u32, offset: u32)
        -> Result<Vec<CitationEdge>>;

    async fn count_references(&self, uri: &str) -> Result<u64>;

    /// Delete every edge with `uri` at either end. Returns the number removed.
    async fn delete_citations_for(&self, uri: &str) -> Result<u64>;

    /// Entities sharing at least `min_count` distinct citers with `uri`,
    /// excluding `uri`, ordered by count descending then URI ascending.
    ///
    /// The default walks [`citing`](GraphStore::citing) and
    /// [`references`](GraphStore::references); backends with a query
    /// language should override it with a single query.
    async fn co_cited(&self, uri: &str, min_count: u64) -> Result<Vec<CoCitationResult>> {
        let total = self.count_citing(uri).await?;
        let citers = self.citing(uri, clamp_u32(total), 0).await?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for citer in &citers {
            let n = self.count_references(&citer.citing_uri).await?;
            for edge in self.references(&citer.citing_uri, clamp_u32(n), 0).await? {
                if edge.cited_uri != uri {
                    *counts.entry(edge.cited_uri).or_insert(0) += 1;
                }
            }
        }

        Ok(rank_co_citations(counts, min_count))
    }
}

fn clamp_u32(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Filter by threshold and order by count desc, then URI asc.
pub fn rank_co_citations(counts: HashMap<String, u64>, min_count: u64) -> Vec<CoCitationResult> {
    let mut results: Vec<CoCitationResult> = counts
        .into_iter()
        .filter(|(_, n)| *n >= min_count)
        .map(|(uri, co_citation_count)| CoCitationResult {
            uri,
            co_citation_count,
        })
        .collect();
    results.sort_by(|a, b| {
        b.co_citation_count
            .cmp(&a.co_citation_count)
            .then_with(|| a.uri.cmp(&b.uri))
    });
    results
}
