//! Metrics engine: engagement counters, unique-actor estimates and
//! windowed trending over a [`CounterStore`].
//!
//! # Key layout
//!
//! | Key | Kind | Fed by |
//! |-----|------|--------|
//! | `views:{uri}` | counter | every view |
//! | `unique:{uri}` | HyperLogLog | views with an actor |
//! | `views:{24h,7d,30d}:{uri}` | scored set, TTL = window | every view |
//! | `downloads:{uri}` | counter | every download |
//! | `unique:downloads:{uri}` | HyperLogLog | downloads with an actor |
//! | `dwell:total:{uri}` / `dwell:count:{uri}` | counters | dwell samples |
//! | `search:clicks:{uri}` / `search:downloads:{uri}` | counters | search events |
//!
//! Windowed entries are scored by their insertion time in milliseconds.
//! Each insert also trims entries older than the window and pushes the key
//! expiry out by one window, so idle subjects disappear on their own.
//!
//! Every mutating call builds one [`CounterPipeline`] and executes it once.
//! The engine itself holds no locks.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{IndexError, IndexResult};
use crate::models::{AggregatedMetrics, MetricEvent, TrendWindow, TrendingEntry};
use crate::store::{CounterPipeline, CounterRead, CounterStore, MetricsSink};

pub const DEFAULT_MAX_TRENDING_LIMIT: usize = 100;

fn views_key(uri: &str) -> String {
    format!("views:{}", uri)
}

fn window_key(window: TrendWindow, uri: &str) -> String {
    format!("views:{}:{}", window.label(), uri)
}

fn unique_views_key(uri: &str) -> String {
    format!("unique:{}", uri)
}

fn downloads_key(uri: &str) -> String {
    format!("downloads:{}", uri)
}

fn unique_downloads_key(uri: &str) -> String {
    format!("unique:downloads:{}", uri)
}

pub struct MetricsEngine {
    counters: Arc<dyn CounterStore>,
    sink: Option<Arc<dyn MetricsSink>>,
    clock: Arc<dyn Clock>,
    max_trending_limit: usize,
}

impl MetricsEngine {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self {
            counters,
            sink: None,
            clock: Arc::new(SystemClock),
            max_trending_limit: DEFAULT_MAX_TRENDING_LIMIT,
        }
    }

    /// Destination for [`flush_to_database`](Self::flush_to_database).
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_trending_limit(mut self, limit: usize) -> Self {
        self.max_trending_limit = limit.max(1);
        self
    }

    pub async fn record_view(&self, uri: &str, actor_id: Option<&str>) -> IndexResult<()> {
        self.record(MetricEvent::View {
            uri: uri.to_string(),
            actor_id: actor_id.map(str::to_string),
        })
        .await
    }

    pub async fn record_download(&self, uri: &str, actor_id: Option<&str>) -> IndexResult<()> {
        self.record(MetricEvent::Download {
            uri: uri.to_string(),
            actor_id: actor_id.map(str::to_string),
        })
        .await
    }

    pub async fn record_dwell_time(&self, uri: &str, duration_ms: u64) -> IndexResult<()> {
        self.record(MetricEvent::DwellTime {
            uri: uri.to_string(),
            duration_ms,
        })
        .await
    }

    pub async fn record_search_click(&self, uri: &str) -> IndexResult<()> {
        self.record(MetricEvent::SearchClick {
            uri: uri.to_string(),
        })
        .await
    }

    pub async fn record_search_download(&self, uri: &str) -> IndexResult<()> {
        self.record(MetricEvent::SearchDownload {
            uri: uri.to_string(),
        })
        .await
    }

    /// Apply one event.
    pub async fn record(&self, event: MetricEvent) -> IndexResult<()> {
        self.batch_increment(std::slice::from_ref(&event)).await
    }

    /// Apply many events in one pipeline. An empty batch is a no-op.
    ///
    /// Every event is validated before anything is sent to the store.
    pub async fn batch_increment(&self, events: &[MetricEvent]) -> IndexResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        for event in events {
            validate_event(event)?;
        }

        let mut pipeline = self.counters.pipeline(self.clock.now_millis());
        for event in events {
            append_event(&mut pipeline, event)?;
        }
        let ops = pipeline.len();
        self.counters.exec(pipeline).await?;
        tracing::debug!(events = events.len(), ops, "metrics pipeline applied");
        Ok(())
    }

    /// Read every counter for `uri` in one round-trip. Absent data is zero.
    pub async fn get_metrics(&self, uri: &str) -> IndexResult<AggregatedMetrics> {
        let now = self.clock.now_millis();
        let mut reads = vec![
            CounterRead::Get {
                key: views_key(uri),
            },
            CounterRead::PfCount {
                key: unique_views_key(uri),
            },
            CounterRead::Get {
                key: downloads_key(uri),
            },
            CounterRead::PfCount {
                key: unique_downloads_key(uri),
            },
            CounterRead::Get {
                key: format!("search:clicks:{}", uri),
            },
            CounterRead::Get {
                key: format!("search:downloads:{}", uri),
            },
            CounterRead::Get {
                key: format!("dwell:total:{}", uri),
            },
            CounterRead::Get {
                key: format!("dwell:count:{}", uri),
            },
        ];
        for window in TrendWindow::ALL {
            reads.push(window_count(window, uri, now));
        }

        let v: Vec<u64> = self
            .counters
            .read(&reads, now)
            .await?
            .into_iter()
            .map(|n| n.max(0) as u64)
            .collect();
        if v.len() != reads.len() {
            return Err(IndexError::Transient(anyhow::anyhow!(
                "counter store answered {} of {} reads",
                v.len(),
                reads.len()
            )));
        }

        let (dwell_total, dwell_count) = (v[6], v[7]);
        Ok(AggregatedMetrics {
            uri: uri.to_string(),
            total_views: v[0],
            unique_views: v[1],
            total_downloads: v[2],
            unique_downloads: v[3],
            search_clicks: v[4],
            search_downloads: v[5],
            dwell_time_samples: dwell_count,
            avg_dwell_time_ms: (dwell_count > 0).then(|| dwell_total / dwell_count),
            views_24h: v[8],
            views_7d: v[9],
            views_30d: v[10],
        })
    }

    pub async fn get_view_count(&self, uri: &str) -> IndexResult<u64> {
        let now = self.clock.now_millis();
        let v = self
            .counters
            .read(&[CounterRead::Get { key: views_key(uri) }], now)
            .await?;
        Ok(v.first().copied().unwrap_or(0).max(0) as u64)
    }

    /// Top `limit` subjects by views inside `window`, descending, ties by URI.
    pub async fn get_trending(
        &self,
        window: TrendWindow,
        limit: usize,
    ) -> IndexResult<Vec<TrendingEntry>> {
        if limit == 0 || limit > self.max_trending_limit {
            return Err(IndexError::validation(format!(
                "trending limit must be between 1 and {}",
                self.max_trending_limit
            )));
        }

        let now = self.clock.now_millis();
        let prefix = format!("views:{}:", window.label());
        let keys = self.counters.scan_keys(&prefix, now).await?;
        let subjects: Vec<&str> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .collect();
        if subjects.is_empty() {
            return Ok(Vec::new());
        }

        let reads: Vec<CounterRead> = subjects
            .iter()
            .map(|uri| window_count(window, uri, now))
            .collect();
        let counts = self.counters.read(&reads, now).await?;

        let mut entries: Vec<TrendingEntry> = subjects
            .into_iter()
            .zip(counts)
            .filter(|(_, n)| *n > 0)
            .map(|(uri, n)| TrendingEntry {
                subject_uri: uri.to_string(),
                score: n as u64,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.subject_uri.cmp(&b.subject_uri))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Persist one snapshot per subject with view or download activity.
    ///
    /// Returns how many subjects were written. A subject that fails is
    /// logged and left out of the count; only a failure to enumerate
    /// subjects is an error.
    pub async fn flush_to_database(&self) -> IndexResult<usize> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| IndexError::validation("no metrics sink configured"))?;

        let now = self.clock.now_millis();
        let mut subjects = BTreeSet::new();
        for key in self.counters.scan_keys("views:", now).await? {
            if let Some(uri) = key.strip_prefix("views:") {
                if !is_windowed(uri) {
                    subjects.insert(uri.to_string());
                }
            }
        }
        for key in self.counters.scan_keys("downloads:", now).await? {
            if let Some(uri) = key.strip_prefix("downloads:") {
                subjects.insert(uri.to_string());
            }
        }

        let at = self.clock.now();
        let mut flushed = 0;
        for uri in &subjects {
            let result = match self.get_metrics(uri).await {
                Ok(metrics) => sink.persist_snapshot(&metrics, at).await.map_err(IndexError::from),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => flushed += 1,
                Err(e) => tracing::warn!(uri = %uri, error = %e, "metrics flush skipped subject"),
            }
        }

        tracing::info!(considered = subjects.len(), flushed, "metrics flushed");
        Ok(flushed)
    }
}

fn is_windowed(rest: &str) -> bool {
    TrendWindow::ALL.iter().any(|w| {
        rest.strip_prefix(w.label())
            .is_some_and(|r| r.starts_with(':'))
    })
}

/// Count entries scored inside the trailing window ending at `now`.
fn window_count(window: TrendWindow, uri: &str, now: i64) -> CounterRead {
    CounterRead::ZCount {
        key: window_key(window, uri),
        min: now - window.duration_millis() + 1,
        max: now,
    }
}

fn validate_event(event: &MetricEvent) -> IndexResult<()> {
    if event.subject_uri().trim().is_empty() {
        return Err(IndexError::validation("metric event has an empty subject uri"));
    }
    if let MetricEvent::DwellTime { duration_ms, .. } = event {
        if i64::try_from(*duration_ms).is_err() {
            return Err(IndexError::validation("dwell time out of range"));
        }
    }
    Ok(())
}

fn append_event(p: &mut CounterPipeline, event: &MetricEvent) -> IndexResult<()> {
    let now = p.now_ms();
    match event {
        MetricEvent::View { uri, actor_id } => {
            p.incr(views_key(uri));
            if let Some(actor) = actor_id {
                p.pfadd(unique_views_key(uri), actor.as_str());
            }
            for window in TrendWindow::ALL {
                let key = window_key(window, uri);
                let span = window.duration_millis();
                p.zadd(key.clone(), format!("{}:{}", now, Uuid::new_v4()), now)
                    .zrem_range_by_score(key.clone(), now - span)
                    .expire_at(key, now + span);
            }
        }
        MetricEvent::Download { uri, actor_id } => {
            p.incr(downloads_key(uri));
            if let Some(actor) = actor_id {
                p.pfadd(unique_downloads_key(uri), actor.as_str());
            }
        }
        MetricEvent::DwellTime { uri, duration_ms } => {
            let ms = i64::try_from(*duration_ms)
                .map_err(|_| IndexError::validation("dwell time out of range"))?;
            p.incr_by(format!("dwell:total:{}", uri), ms)
                .incr(format!("dwell:count:{}", uri));
        }
        MetricEvent::SearchClick { uri } => {
            p.incr(format!("search:clicks:{}", uri));
        }
        MetricEvent::SearchDownload { uri } => {
            p.incr(format!("search:downloads:{}", uri));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::{InMemoryCounterStore, InMemoryMetricsSink};

    const DAY: i64 = 24 * 60 * 60 * 1000;

    fn engine() -> (Arc<MetricsEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let engine = MetricsEngine::new(Arc::new(InMemoryCounterStore::new()))
            .with_clock(clock.clone());
        (Arc::new(engine), clock)
    }

    #[tokio::test]
    async fn concurrent_views_are_all_counted() {
        let (engine, _) = engine();
        let uri = "at://did:plc:a/pub.chive.eprint.submission/1";
        let mut handles = Vec::new();
        for _ in 0..100 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.record_view(uri, None).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(engine.get_view_count(uri).await.unwrap(), 100);
        assert_eq!(engine.get_metrics(uri).await.unwrap().views_24h, 100);
    }

    #[tokio::test]
    async fn unique_views_exact_at_small_scale() {
        let (engine, _) = engine();
        let uri = "at://did:plc:a/pub.chive.eprint.submission/1";
        for k in 0..100 {
            let actor = format!("did:plc:actor{}", k);
            engine.record_view(uri, Some(&actor)).await.unwrap();
            engine.record_view(uri, Some(&actor)).await.unwrap();
        }
        engine.record_view(uri, None).await.unwrap();

        let m = engine.get_metrics(uri).await.unwrap();
        assert_eq!(m.total_views, 201);
        assert_eq!(m.unique_views, 100);
    }

    #[tokio::test]
    async fn absent_subject_reads_as_zero() {
        let (engine, _) = engine();
        let m = engine.get_metrics("at://nobody/x/y").await.unwrap();
        assert_eq!(
            m,
            AggregatedMetrics {
                uri: "at://nobody/x/y".to_string(),
                ..Default::default()
            }
        );
        assert_eq!(engine.get_view_count("at://nobody/x/y").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn trending_orders_by_window_count() {
        let (engine, _) = engine();
        for (uri, n) in [("at://a/c/five", 5), ("at://a/c/ten", 10), ("at://a/c/fifteen", 15)] {
            for _ in 0..n {
                engine.record_view(uri, None).await.unwrap();
            }
        }
        let top = engine.get_trending(TrendWindow::Day, 10).await.unwrap();
        let scores: Vec<u64> = top.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![15, 10, 5]);
        assert_eq!(top[0].subject_uri, "at://a/c/fifteen");

        let top1 = engine.get_trending(TrendWindow::Day, 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn trending_ties_break_by_uri() {
        let (engine, _) = engine();
        for uri in ["at://a/c/b", "at://a/c/a"] {
            engine.record_view(uri, None).await.unwrap();
        }
        let top = engine.get_trending(TrendWindow::Week, 10).await.unwrap();
        assert_eq!(top[0].subject_uri, "at://a/c/a");
        assert_eq!(top[1].subject_uri, "at://a/c/b");
    }

    #[tokio::test]
    async fn windows_age_out_independently() {
        let (engine, clock) = engine();
        let uri = "at://a/c/r";
        engine.record_view(uri, None).await.unwrap();

        clock.advance_millis(2 * DAY);
        let m = engine.get_metrics(uri).await.unwrap();
        assert_eq!((m.views_24h, m.views_7d, m.views_30d), (0, 1, 1));
        assert!(engine.get_trending(TrendWindow::Day, 10).await.unwrap().is_empty());

        clock.advance_millis(29 * DAY);
        let m = engine.get_metrics(uri).await.unwrap();
        assert_eq!((m.views_24h, m.views_7d, m.views_30d), (0, 0, 0));
        assert_eq!(m.total_views, 1, "lifetime counter never expires");
    }

    #[tokio::test]
    async fn trending_limit_is_validated() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.get_trending(TrendWindow::Day, 0).await,
            Err(IndexError::Validation(_))
        ));
        assert!(engine.get_trending(TrendWindow::Day, 101).await.is_err());
    }

    #[tokio::test]
    async fn batch_increment_mixes_event_kinds() {
        let (engine, _) = engine();
        let uri = "at://a/c/r".to_string();
        engine.batch_increment(&[]).await.unwrap();
        engine
            .batch_increment(&[
                MetricEvent::View {
                    uri: uri.clone(),
                    actor_id: Some("did:plc:x".into()),
                },
                MetricEvent::Download {
                    uri: uri.clone(),
                    actor_id: Some("did:plc:x".into()),
                },
                MetricEvent::Download {
                    uri: uri.clone(),
                    actor_id: Some("did:plc:y".into()),
                },
                MetricEvent::DwellTime {
                    uri: uri.clone(),
                    duration_ms: 1_000,
                },
                MetricEvent::DwellTime {
                    uri: uri.clone(),
                    duration_ms: 3_000,
                },
                MetricEvent::SearchClick { uri: uri.clone() },
                MetricEvent::SearchDownload { uri: uri.clone() },
            ])
            .await
            .unwrap();

        let m = engine.get_metrics(&uri).await.unwrap();
        assert_eq!(m.total_views, 1);
        assert_eq!(m.unique_views, 1);
        assert_eq!(m.total_downloads, 2);
        assert_eq!(m.unique_downloads, 2);
        assert_eq!(m.dwell_time_samples, 2);
        assert_eq!(m.avg_dwell_time_ms, Some(2_000));
        assert_eq!(m.search_clicks, 1);
        assert_eq!(m.search_downloads, 1);
    }

    #[tokio::test]
    async fn invalid_event_rejects_whole_batch() {
        let (engine, _) = engine();
        let err = engine
            .batch_increment(&[
                MetricEvent::View {
                    uri: "at://a/c/r".into(),
                    actor_id: None,
                },
                MetricEvent::SearchClick { uri: " ".into() },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Validation(_)));
        assert_eq!(engine.get_view_count("at://a/c/r").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_counts_only_successful_subjects() {
        let counters = Arc::new(InMemoryCounterStore::new());
        let sink = Arc::new(InMemoryMetricsSink::new());
        let engine = MetricsEngine::new(counters).with_sink(sink.clone());

        engine.record_view("at://a/c/1", None).await.unwrap();
        engine.record_view("at://a/c/2", None).await.unwrap();
        engine.record_download("at://a/c/3", None).await.unwrap();
        sink.fail_for("at://a/c/2");

        assert_eq!(engine.flush_to_database().await.unwrap(), 2);
        assert_eq!(sink.snapshot("at://a/c/1").unwrap().total_views, 1);
        assert_eq!(sink.snapshot("at://a/c/3").unwrap().total_downloads, 1);
        assert!(sink.snapshot("at://a/c/2").is_none());
    }

    #[tokio::test]
    async fn flush_without_sink_is_rejected() {
        let (engine, _) = engine();
        assert!(engine.flush_to_database().await.is_err());
    }
}
