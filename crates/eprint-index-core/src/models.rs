//! Core data models used throughout the eprint index.
//!
//! Persisted shapes ([`IndexedRecord`], [`CitationEdge`]) and the ephemeral
//! results computed on demand by the engines. Serialized field names are
//! camelCase to match the protocol surfaces that consume them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Local cache entry for one authoritative record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedRecord {
    pub uri: String,
    /// CID of the record as last indexed.
    pub content_hash: String,
    pub pds_endpoint: String,
    /// `$type` NSID of the record body.
    pub record_type: String,
    pub record_json: String,
    pub indexed_at: DateTime<Utc>,
}

/// Outcome of comparing a local hash with the authoritative one.
///
/// `is_stale` is `None` whenever `error` is set: a failed fetch says
/// nothing about freshness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessCheckResult {
    pub uri: String,
    #[serde(rename = "indexedCID")]
    pub indexed_hash: Option<String>,
    #[serde(rename = "pdsCID", skip_serializing_if = "Option::is_none")]
    pub authoritative_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub refreshed: bool,
    pub changed: bool,
    #[serde(rename = "previousCID")]
    pub previous_hash: String,
    #[serde(rename = "currentCID")]
    pub current_hash: String,
}

/// A registered personal data server included in periodic sweeps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdsRegistration {
    pub endpoint: String,
    pub registered_at: DateTime<Utc>,
    pub last_swept_at: Option<DateTime<Utc>>,
}

/// Totals from one staleness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: u64,
    pub refreshed: u64,
    pub changed: u64,
    pub not_found: u64,
    pub failed: u64,
}

/// One engagement event. Only its aggregate effect is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetricEvent {
    #[serde(rename_all = "camelCase")]
    View {
        uri: String,
        actor_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Download {
        uri: String,
        actor_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DwellTime { uri: String, duration_ms: u64 },
    SearchClick { uri: String },
    SearchDownload { uri: String },
}

impl MetricEvent {
    pub fn subject_uri(&self) -> &str {
        match self {
            MetricEvent::View { uri, .. }
            | MetricEvent::Download { uri, .. }
            | MetricEvent::DwellTime { uri, .. }
            | MetricEvent::SearchClick { uri }
            | MetricEvent::SearchDownload { uri } => uri,
        }
    }
}

/// Point-in-time engagement view for one subject. Absent data reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetrics {
    pub uri: String,
    pub total_views: u64,
    /// HyperLogLog estimate; exact at small cardinalities.
    pub unique_views: u64,
    pub total_downloads: u64,
    pub unique_downloads: u64,
    pub views_24h: u64,
    pub views_7d: u64,
    pub views_30d: u64,
    pub search_clicks: u64,
    pub search_downloads: u64,
    pub dwell_time_samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_dwell_time_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingEntry {
    pub subject_uri: String,
    pub score: u64,
}

/// Trailing interval for windowed view counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TrendWindow {
    pub const ALL: [TrendWindow; 3] = [TrendWindow::Day, TrendWindow::Week, TrendWindow::Month];

    pub fn label(self) -> &'static str {
        match self {
            TrendWindow::Day => "24h",
            TrendWindow::Week => "7d",
            TrendWindow::Month => "30d",
        }
    }

    pub fn duration_millis(self) -> i64 {
        const HOUR: i64 = 60 * 60 * 1000;
        match self {
            TrendWindow::Day => 24 * HOUR,
            TrendWindow::Week => 7 * 24 * HOUR,
            TrendWindow::Month => 30 * 24 * HOUR,
        }
    }
}

impl fmt::Display for TrendWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TrendWindow {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TrendWindow::Day),
            "7d" => Ok(TrendWindow::Week),
            "30d" => Ok(TrendWindow::Month),
            other => Err(IndexError::validation(format!(
                "unknown trending window '{}': must be 24h, 7d, or 30d",
                other
            ))),
        }
    }
}

/// A citation fact submitted for upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCitation {
    pub citing_uri: String,
    pub cited_uri: String,
    #[serde(default)]
    pub is_influential: bool,
    /// Provenance tag, e.g. the enrichment plugin that found it.
    pub source: String,
}

/// A materialized edge in the citation graph, identified by
/// `(citing_uri, cited_uri)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationEdge {
    pub citing_uri: String,
    pub cited_uri: String,
    pub is_influential: bool,
    pub source: String,
    pub discovered_at: DateTime<Utc>,
}

/// Counts from one batch upsert. No per-item status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub submitted: usize,
    pub materialized: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageOptions {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedCitations {
    pub citations: Vec<CitationEdge>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoCitationResult {
    pub uri: String,
    pub co_citation_count: u64,
}
