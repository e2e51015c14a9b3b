//! Sync engine: keeps indexed records truthful relative to their
//! authoritative repositories.
//!
//! Staleness is decided purely by content-hash equality. Timestamps only
//! pick sweep candidates; they never decide freshness.
//!
//! Refresh is read, compare, then conditionally write. Concurrent refreshes
//! of the same URI may race on the compare step but every writer stores the
//! same authoritative hash, so the final state does not depend on
//! interleaving and no lock is taken.
//!
//! Every operation makes a single attempt. Retrying is the caller's policy.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{IndexError, IndexResult};
use crate::models::{
    IndexedRecord, PdsRegistration, RefreshOutcome, StalenessCheckResult, SweepReport,
};
use crate::record::{IndexableRecord, RecordUri};
use crate::repository::RepositoryClient;
use crate::store::RecordStore;

/// Default cap on records returned by one stale-record scan.
pub const DEFAULT_SCAN_LIMIT: usize = 500;

pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    repository: Arc<dyn RepositoryClient>,
    clock: Arc<dyn Clock>,
    scan_limit: usize,
}

impl SyncEngine {
    pub fn new(records: Arc<dyn RecordStore>, repository: Arc<dyn RepositoryClient>) -> Self {
        Self {
            records,
            repository,
            clock: Arc::new(SystemClock),
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit.max(1);
        self
    }

    /// Record provenance for a URI that is already indexed.
    ///
    /// Tracking never creates a record; an unknown URI is `NotFound`.
    pub async fn track_source(&self, uri: &str, hash: &str, pds_endpoint: &str) -> IndexResult<()> {
        let updated = self
            .records
            .update_source(uri, hash, pds_endpoint, self.clock.now())
            .await?;
        if !updated {
            return Err(IndexError::not_found(uri));
        }
        tracing::debug!(uri, hash, pds_endpoint, "tracked source");
        Ok(())
    }

    /// Compare the indexed hash with the authoritative one.
    ///
    /// Never fails: every problem is reported in the result's `error`, and
    /// `is_stale` stays undetermined whenever the authoritative hash could
    /// not be obtained.
    pub async fn check_staleness(&self, uri: &str) -> StalenessCheckResult {
        let mut result = StalenessCheckResult {
            uri: uri.to_string(),
            indexed_hash: None,
            authoritative_hash: None,
            is_stale: None,
            error: None,
        };

        let local = match self.records.get_record(uri).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                result.error = Some("not indexed".to_string());
                return result;
            }
            Err(e) => {
                result.error = Some(format!("index lookup failed: {}", e));
                return result;
            }
        };
        result.indexed_hash = Some(local.content_hash.clone());

        match self
            .repository
            .fetch_record(uri, hint(&local.pds_endpoint))
            .await
        {
            Ok(Some(authoritative)) => {
                result.is_stale = Some(authoritative.cid != local.content_hash);
                result.authoritative_hash = Some(authoritative.cid);
            }
            Ok(None) => {
                result.error = Some("record not found in repository".to_string());
            }
            Err(e) => {
                tracing::warn!(uri, error = %e, "staleness fetch failed");
                result.error = Some(format!("fetch failed: {}", e));
            }
        }
        result
    }

    /// Bring one indexed record up to date with its repository.
    ///
    /// A repository miss is `NotFound` and leaves the index untouched; a
    /// single miss is not treated as a tombstone. An unchanged hash returns
    /// without writing.
    pub async fn refresh_record(&self, uri: &str) -> IndexResult<RefreshOutcome> {
        let local = self
            .records
            .get_record(uri)
            .await?
            .ok_or_else(|| IndexError::not_found(uri))?;

        let authoritative = self
            .repository
            .fetch_record(uri, hint(&local.pds_endpoint))
            .await?
            .ok_or_else(|| IndexError::not_found(uri))?;

        if authoritative.cid == local.content_hash {
            tracing::debug!(uri, cid = %local.content_hash, "refresh: unchanged");
            return Ok(RefreshOutcome {
                refreshed: true,
                changed: false,
                previous_hash: local.content_hash.clone(),
                current_hash: local.content_hash,
            });
        }

        let record = IndexableRecord::from_value(&authoritative.value)?;
        let body = record.to_json()?;
        let written = self
            .records
            .update_content(uri, &authoritative.cid, &body, self.clock.now())
            .await?;
        if !written {
            // Deleted between our read and write.
            return Err(IndexError::not_found(uri));
        }

        tracing::info!(
            uri,
            previous = %local.content_hash,
            current = %authoritative.cid,
            "refresh: content changed"
        );
        Ok(RefreshOutcome {
            refreshed: true,
            changed: true,
            previous_hash: local.content_hash,
            current_hash: authoritative.cid,
        })
    }

    /// Records not indexed within the last `max_age_ms`, oldest first.
    ///
    /// Best effort: absence from this list says nothing about freshness.
    pub async fn detect_stale_records(&self, max_age_ms: i64) -> IndexResult<Vec<IndexedRecord>> {
        self.stale_candidates(max_age_ms, self.scan_limit).await
    }

    async fn stale_candidates(
        &self,
        max_age_ms: i64,
        limit: usize,
    ) -> IndexResult<Vec<IndexedRecord>> {
        if max_age_ms < 0 {
            return Err(IndexError::validation("max age must not be negative"));
        }
        let cutoff = self.clock.now() - Duration::milliseconds(max_age_ms);
        Ok(self.records.records_indexed_before(cutoff, limit).await?)
    }

    /// Validate and store a record, creating or overwriting its index entry.
    ///
    /// Returns the parsed record so callers can route it further.
    pub async fn index_record(
        &self,
        uri: &str,
        cid: &str,
        pds_endpoint: &str,
        value: &serde_json::Value,
    ) -> IndexResult<IndexableRecord> {
        RecordUri::parse(uri)?;
        if cid.trim().is_empty() {
            return Err(IndexError::validation("cid must not be empty"));
        }
        let record = IndexableRecord::from_value(value)?;

        let indexed = IndexedRecord {
            uri: uri.to_string(),
            content_hash: cid.to_string(),
            pds_endpoint: pds_endpoint.to_string(),
            record_type: record.record_type().to_string(),
            record_json: record.to_json()?,
            indexed_at: self.clock.now(),
        };
        self.records.upsert_record(&indexed).await?;
        tracing::info!(uri, cid, record_type = record.record_type(), "indexed record");
        Ok(record)
    }

    pub async fn delete_record(&self, uri: &str) -> IndexResult<()> {
        if !self.records.delete_record(uri).await? {
            return Err(IndexError::not_found(uri));
        }
        tracing::info!(uri, "deleted record");
        Ok(())
    }

    /// Add a repository endpoint to the sweep registry. Idempotent.
    pub async fn register_pds(&self, endpoint: &str) -> IndexResult<String> {
        let endpoint = normalize_endpoint(endpoint)?;
        self.records.register_pds(&endpoint, self.clock.now()).await?;
        tracing::info!(endpoint = %endpoint, "registered PDS");
        Ok(endpoint)
    }

    pub async fn list_pds(&self) -> IndexResult<Vec<PdsRegistration>> {
        Ok(self.records.list_pds().await?)
    }

    /// Refresh up to `limit` records older than `max_age_ms`, once each.
    ///
    /// Per-record failures are counted, not raised. Records confirmed
    /// unchanged get a fresh `indexed_at` so they leave the candidate set,
    /// but only while their stored hash is still the one verified.
    pub async fn sweep_stale(&self, max_age_ms: i64, limit: usize) -> IndexResult<SweepReport> {
        let candidates = self.stale_candidates(max_age_ms, limit).await?;
        let mut report = SweepReport::default();
        let mut endpoints = BTreeSet::new();

        for record in candidates {
            report.examined += 1;
            if !record.pds_endpoint.is_empty() {
                endpoints.insert(record.pds_endpoint.clone());
            }

            match self.refresh_record(&record.uri).await {
                Ok(outcome) if outcome.changed => {
                    report.refreshed += 1;
                    report.changed += 1;
                }
                Ok(outcome) => {
                    report.refreshed += 1;
                    match self
                        .records
                        .touch_verified(&record.uri, &outcome.current_hash, self.clock.now())
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(
                            uri = %record.uri,
                            "record changed during sweep; not stamped"
                        ),
                        Err(e) => tracing::warn!(
                            uri = %record.uri,
                            error = %e,
                            "could not stamp verified record"
                        ),
                    }
                }
                Err(IndexError::NotFound { .. }) => report.not_found += 1,
                Err(e) => {
                    tracing::warn!(
                        uri = %record.uri,
                        code = e.code(),
                        error = %e,
                        "sweep refresh failed"
                    );
                    report.failed += 1;
                }
            }
        }

        let now = self.clock.now();
        for endpoint in &endpoints {
            if let Err(e) = self.records.mark_pds_swept(endpoint, now).await {
                tracing::warn!(endpoint = %endpoint, error = %e, "could not stamp PDS sweep");
            }
        }

        tracing::info!(
            examined = report.examined,
            refreshed = report.refreshed,
            changed = report.changed,
            not_found = report.not_found,
            failed = report.failed,
            "sweep complete"
        );
        Ok(report)
    }
}

fn hint(endpoint: &str) -> Option<&str> {
    if endpoint.is_empty() {
        None
    } else {
        Some(endpoint)
    }
}

/// Accept only absolute http(s) URLs; strip trailing slashes.
fn normalize_endpoint(endpoint: &str) -> IndexResult<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| {
            IndexError::validation(format!("PDS endpoint must be an http(s) URL: {}", endpoint))
        })?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(IndexError::validation(format!(
            "PDS endpoint has no host: {}",
            endpoint
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::AuthoritativeRecord;
    use crate::store::memory::InMemoryRecordStore;

    const URI: &str = "at://did:plc:abc/pub.chive.eprint.submission/3k1";
    const PDS: &str = "https://pds.example.com";

    enum Answer {
        Found(AuthoritativeRecord),
        Missing,
        Unreachable,
    }

    #[derive(Default)]
    struct FakeRepository {
        answers: Mutex<HashMap<String, Answer>>,
        calls: AtomicUsize,
    }

    impl FakeRepository {
        fn set(&self, uri: &str, answer: Answer) {
            self.answers.lock().unwrap().insert(uri.to_string(), answer);
        }

        fn publish(&self, uri: &str, cid: &str, title: &str) {
            self.set(
                uri,
                Answer::Found(AuthoritativeRecord {
                    uri: uri.to_string(),
                    cid: cid.to_string(),
                    value: eprint(title),
                    pds_endpoint: PDS.to_string(),
                }),
            );
        }
    }

    #[async_trait]
    impl RepositoryClient for FakeRepository {
        async fn fetch_record(
            &self,
            uri: &str,
            _pds_hint: Option<&str>,
        ) -> Result<Option<AuthoritativeRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.lock().unwrap().get(uri) {
                Some(Answer::Found(r)) => Ok(Some(r.clone())),
                Some(Answer::Missing) | None => Ok(None),
                Some(Answer::Unreachable) => Err(anyhow!("connection refused")),
            }
        }
    }

    fn eprint(title: &str) -> serde_json::Value {
        json!({
            "$type": "pub.chive.eprint.submission",
            "title": title,
            "abstract": "Abstract.",
            "authors": [{ "name": "A. Researcher" }],
            "createdAt": "2026-01-01T00:00:00Z"
        })
    }

    struct Harness {
        engine: Arc<SyncEngine>,
        store: Arc<InMemoryRecordStore>,
        repo: Arc<FakeRepository>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryRecordStore::new());
        let repo = Arc::new(FakeRepository::default());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let engine = SyncEngine::new(store.clone(), repo.clone()).with_clock(clock.clone());
        Harness {
            engine: Arc::new(engine),
            store,
            repo,
            clock,
        }
    }

    async fn indexed(h: &Harness, uri: &str, cid: &str) {
        h.engine
            .index_record(uri, cid, PDS, &eprint("Original"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn track_source_requires_existing_record() {
        let h = harness();
        let err = h.engine.track_source(URI, "bafy1", PDS).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
        assert!(h.store.is_empty());

        indexed(&h, URI, "bafy1").await;
        h.engine
            .track_source(URI, "bafy2", "https://other.example")
            .await
            .unwrap();
        let rec = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy2");
        assert_eq!(rec.pds_endpoint, "https://other.example");
    }

    #[tokio::test]
    async fn check_staleness_not_indexed() {
        let h = harness();
        let r = h.engine.check_staleness(URI).await;
        assert_eq!(r.error.as_deref(), Some("not indexed"));
        assert_eq!(r.is_stale, None);
        assert_eq!(h.repo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn check_staleness_compares_hashes() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;

        h.repo.publish(URI, "bafy1", "Original");
        let r = h.engine.check_staleness(URI).await;
        assert_eq!(r.is_stale, Some(false));
        assert_eq!(r.authoritative_hash.as_deref(), Some("bafy1"));

        h.repo.publish(URI, "bafy2", "Revised");
        let r = h.engine.check_staleness(URI).await;
        assert_eq!(r.is_stale, Some(true));
        assert_eq!(r.indexed_hash.as_deref(), Some("bafy1"));
    }

    #[tokio::test]
    async fn check_staleness_fetch_failure_is_undetermined() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.set(URI, Answer::Unreachable);

        let r = h.engine.check_staleness(URI).await;
        assert!(r.error.is_some());
        assert_eq!(r.is_stale, None);
        assert_eq!(r.authoritative_hash, None);
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.publish(URI, "bafy2", "Revised");

        let first = h.engine.refresh_record(URI).await.unwrap();
        assert!(first.refreshed && first.changed);
        assert_eq!(first.previous_hash, "bafy1");
        assert_eq!(first.current_hash, "bafy2");

        let second = h.engine.refresh_record(URI).await.unwrap();
        assert!(second.refreshed);
        assert!(!second.changed);
        assert_eq!(second.previous_hash, second.current_hash);

        let rec = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy2");
        assert!(rec.record_json.contains("Revised"));
    }

    #[tokio::test]
    async fn unchanged_refresh_does_not_write() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        let before = h.store.get_record(URI).await.unwrap().unwrap();
        h.repo.publish(URI, "bafy1", "Original");

        h.clock.advance_millis(60_000);
        h.engine.refresh_record(URI).await.unwrap();
        let after = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn concurrent_refreshes_converge() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.publish(URI, "bafy9", "Final");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move { engine.refresh_record(URI).await }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.current_hash, "bafy9");
        }
        let rec = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy9");
    }

    #[tokio::test]
    async fn refresh_not_found_leaves_index_untouched() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.set(URI, Answer::Missing);

        let err = h.engine.refresh_record(URI).await.unwrap_err();
        assert_eq!(err.code(), "NotFound");
        assert!(h.store.get_record(URI).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refresh_transient_failure_is_retryable() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.set(URI, Answer::Unreachable);

        let err = h.engine.refresh_record(URI).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.repo.calls.load(Ordering::SeqCst), 1, "no internal retry");
    }

    #[tokio::test]
    async fn refresh_rejects_invalid_authoritative_body() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.set(
            URI,
            Answer::Found(AuthoritativeRecord {
                uri: URI.to_string(),
                cid: "bafy2".to_string(),
                value: json!({ "$type": "app.bsky.feed.post", "text": "hi" }),
                pds_endpoint: PDS.to_string(),
            }),
        );

        let err = h.engine.refresh_record(URI).await.unwrap_err();
        assert!(matches!(err, IndexError::Validation(_)));
        let rec = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy1");
    }

    #[tokio::test]
    async fn index_rejects_unrecognized_shapes() {
        let h = harness();
        let err = h
            .engine
            .index_record(URI, "bafy1", PDS, &json!({ "$type": "x.y.z" }))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Validation(_)));
        assert!(h.store.is_empty());

        assert!(h
            .engine
            .index_record("not-a-uri", "bafy1", PDS, &eprint("t"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.engine.delete_record(URI).await.unwrap();
        assert!(matches!(
            h.engine.delete_record(URI).await,
            Err(IndexError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn detect_stale_uses_age() {
        let h = harness();
        let old = "at://did:plc:abc/pub.chive.eprint.submission/old";
        indexed(&h, old, "bafy1").await;
        h.clock.advance_millis(10_000);
        indexed(&h, URI, "bafy1").await;

        let stale = h.engine.detect_stale_records(5_000).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].uri, old);
        assert!(h.engine.detect_stale_records(-1).await.is_err());
    }

    #[tokio::test]
    async fn register_pds_validates_and_normalizes() {
        let h = harness();
        let ep = h.engine.register_pds("https://pds.example.com/").await.unwrap();
        assert_eq!(ep, "https://pds.example.com");
        h.engine.register_pds("https://pds.example.com").await.unwrap();
        assert_eq!(h.engine.list_pds().await.unwrap().len(), 1);

        assert!(h.engine.register_pds("ftp://pds.example.com").await.is_err());
        assert!(h.engine.register_pds("https://").await.is_err());
    }

    #[tokio::test]
    async fn sweep_counts_each_outcome() {
        let h = harness();
        let changed = "at://did:plc:abc/pub.chive.eprint.submission/a";
        let same = "at://did:plc:abc/pub.chive.eprint.submission/b";
        let gone = "at://did:plc:abc/pub.chive.eprint.submission/c";
        let down = "at://did:plc:abc/pub.chive.eprint.submission/d";
        for uri in [changed, same, gone, down] {
            indexed(&h, uri, "bafy1").await;
        }
        h.engine.register_pds(PDS).await.unwrap();
        h.repo.publish(changed, "bafy2", "New");
        h.repo.publish(same, "bafy1", "Original");
        h.repo.set(gone, Answer::Missing);
        h.repo.set(down, Answer::Unreachable);

        h.clock.advance_millis(120_000);
        let report = h.engine.sweep_stale(60_000, 100).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 4,
                refreshed: 2,
                changed: 1,
                not_found: 1,
                failed: 1,
            }
        );

        let pds = h.engine.list_pds().await.unwrap();
        assert!(pds[0].last_swept_at.is_some());

        // Verified and refreshed records drop out of the next scan.
        let again = h.engine.detect_stale_records(60_000).await.unwrap();
        let uris: Vec<_> = again.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris, vec![gone, down]);
    }

    /// Record store that lets a refresh commit between the sweep's compare
    /// and its stamp.
    struct RefreshBeforeStamp {
        inner: InMemoryRecordStore,
        new_hash: &'static str,
        new_body: String,
    }

    #[async_trait]
    impl RecordStore for RefreshBeforeStamp {
        async fn get_record(&self, uri: &str) -> Result<Option<IndexedRecord>> {
            self.inner.get_record(uri).await
        }

        async fn upsert_record(&self, record: &IndexedRecord) -> Result<()> {
            self.inner.upsert_record(record).await
        }

        async fn update_content(
            &self,
            uri: &str,
            content_hash: &str,
            record_json: &str,
            indexed_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<bool> {
            self.inner
                .update_content(uri, content_hash, record_json, indexed_at)
                .await
        }

        async fn update_source(
            &self,
            uri: &str,
            content_hash: &str,
            pds_endpoint: &str,
            indexed_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<bool> {
            self.inner
                .update_source(uri, content_hash, pds_endpoint, indexed_at)
                .await
        }

        async fn touch_verified(
            &self,
            uri: &str,
            expected_hash: &str,
            indexed_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<bool> {
            self.inner
                .update_content(uri, self.new_hash, &self.new_body, indexed_at)
                .await?;
            self.inner
                .touch_verified(uri, expected_hash, indexed_at)
                .await
        }

        async fn delete_record(&self, uri: &str) -> Result<bool> {
            self.inner.delete_record(uri).await
        }

        async fn records_indexed_before(
            &self,
            cutoff: chrono::DateTime<chrono::Utc>,
            limit: usize,
        ) -> Result<Vec<IndexedRecord>> {
            self.inner.records_indexed_before(cutoff, limit).await
        }

        async fn register_pds(
            &self,
            endpoint: &str,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<()> {
            self.inner.register_pds(endpoint, at).await
        }

        async fn list_pds(&self) -> Result<Vec<PdsRegistration>> {
            self.inner.list_pds().await
        }

        async fn mark_pds_swept(
            &self,
            endpoint: &str,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<()> {
            self.inner.mark_pds_swept(endpoint, at).await
        }
    }

    #[tokio::test]
    async fn sweep_stamp_never_rolls_back_a_concurrent_refresh() {
        let new_body = IndexableRecord::from_value(&eprint("Revised"))
            .unwrap()
            .to_json()
            .unwrap();
        let store = Arc::new(RefreshBeforeStamp {
            inner: InMemoryRecordStore::new(),
            new_hash: "bafy2",
            new_body: new_body.clone(),
        });
        let repo = Arc::new(FakeRepository::default());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let engine = SyncEngine::new(store.clone(), repo.clone()).with_clock(clock.clone());

        engine
            .index_record(URI, "bafy1", PDS, &eprint("Original"))
            .await
            .unwrap();
        repo.publish(URI, "bafy1", "Original");

        clock.advance_millis(120_000);
        let report = engine.sweep_stale(60_000, 10).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.changed, 0);

        let rec = store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy2");
        assert_eq!(rec.record_json, new_body);
    }

    #[tokio::test]
    async fn sweep_stamps_verified_record_without_touching_hash() {
        let h = harness();
        indexed(&h, URI, "bafy1").await;
        h.repo.publish(URI, "bafy1", "Original");

        h.clock.advance_millis(120_000);
        h.engine.sweep_stale(60_000, 10).await.unwrap();

        let rec = h.store.get_record(URI).await.unwrap().unwrap();
        assert_eq!(rec.content_hash, "bafy1");
        assert_eq!(rec.pds_endpoint, PDS);
        assert_eq!(rec.indexed_at.timestamp_millis(), 1_700_000_120_000);
    }
}
