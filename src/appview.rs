//! Composition root: the three engines over one SQLite pool.
//!
//! The engines never see each other. `AppView` is the only place that
//! routes one operation to more than one of them (indexing an eprint also
//! registers it as a citation-graph entity; deleting removes both).

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use eprint_index_core::error::{IndexError, IndexResult};
use eprint_index_core::record::IndexableRecord;
use eprint_index_core::repository::RepositoryClient;
use eprint_index_core::{CitationEngine, MetricsEngine, SyncEngine};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::repository::HttpRepositoryClient;
use crate::resilience::RetryPolicy;
use crate::sqlite_counter::SqliteCounterStore;
use crate::sqlite_graph::SqliteGraphStore;
use crate::sqlite_store::{SqliteMetricsSink, SqliteRecordStore};

pub struct AppView {
    pub sync: SyncEngine,
    pub metrics: MetricsEngine,
    pub citations: CitationEngine,
    repository: Arc<dyn RepositoryClient>,
    retry: RetryPolicy,
    pool: SqlitePool,
}

impl AppView {
    /// Connect, migrate, and wire the HTTP repository client.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        let repository = Arc::new(HttpRepositoryClient::new(&config.repository)?);
        Ok(Self::from_parts(pool, config, repository))
    }

    /// Build over an already-migrated pool with any repository client.
    pub fn from_parts(
        pool: SqlitePool,
        config: &Config,
        repository: Arc<dyn RepositoryClient>,
    ) -> Self {
        let sync = SyncEngine::new(
            Arc::new(SqliteRecordStore::new(pool.clone())),
            repository.clone(),
        )
        .with_scan_limit(config.sync.sweep_limit);

        let metrics = MetricsEngine::new(Arc::new(SqliteCounterStore::new(pool.clone())))
            .with_sink(Arc::new(SqliteMetricsSink::new(pool.clone())))
            .with_max_trending_limit(config.metrics.max_trending_limit);

        let citations = CitationEngine::new(Arc::new(SqliteGraphStore::new(pool.clone())))
            .with_page_limits(
                config.citations.default_page_limit,
                config.citations.max_page_limit,
            );

        Self {
            sync,
            metrics,
            citations,
            repository,
            retry: RetryPolicy::from_config(&config.resilience),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch a record from its repository and index it. Eprints also become
    /// citation-graph entities.
    pub async fn index(&self, uri: &str, pds_hint: Option<&str>) -> IndexResult<IndexableRecord> {
        let repository = &self.repository;
        let fetched = self
            .retry
            .run(move || async move { Ok(repository.fetch_record(uri, pds_hint).await?) })
            .await?
            .ok_or_else(|| IndexError::not_found(uri))?;

        let record = self
            .sync
            .index_record(uri, &fetched.cid, &fetched.pds_endpoint, &fetched.value)
            .await?;
        if record.is_eprint() {
            self.citations.register_paper(uri).await?;
        }
        Ok(record)
    }

    /// Remove a record from the index and the citation graph.
    pub async fn delete(&self, uri: &str) -> IndexResult<()> {
        self.sync.delete_record(uri).await?;
        self.citations.remove_paper(uri).await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
