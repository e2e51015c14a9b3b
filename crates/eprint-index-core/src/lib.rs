//! # Eprint Index Core
//!
//! Shared, IO-free logic for the eprint index: data models, the record-kind
//! sum type, store traits with in-memory backends, the HyperLogLog
//! estimator, and the three engines that keep derived state in step with
//! the decentralized network.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Backends that
//! talk to real storage or to personal data servers live in the
//! `eprint-index` application crate and plug in through the traits in
//! [`store`] and [`repository`].
//!
//! ## Engines
//!
//! | Engine | Module | Writes to |
//! |--------|--------|-----------|
//! | Sync | [`sync`] | [`store::RecordStore`] |
//! | Metrics | [`metrics`] | [`store::CounterStore`] |
//! | Citation graph | [`citations`] | [`store::GraphStore`] |
//!
//! The engines share no in-process state and hold no locks. Every mutation
//! is delegated to a single atomic call on the backing store.

pub mod citations;
pub mod clock;
pub mod error;
pub mod hll;
pub mod metrics;
pub mod models;
pub mod record;
pub mod repository;
pub mod store;
pub mod sync;

pub use citations::CitationEngine;
pub use error::IndexError;
pub use metrics::MetricsEngine;
pub use sync::SyncEngine;
