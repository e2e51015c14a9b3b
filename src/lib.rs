//! # Eprint Index
//!
//! An index for eprints published on a decentralized network of personal
//! data servers (PDS). Each user's PDS is the source of truth; this crate
//! keeps three kinds of derived state in step with it:
//!
//! - a local record cache with staleness detection and refresh,
//! - engagement counters with unique-visitor estimates and trending windows,
//! - a closed-world citation graph between indexed eprints.
//!
//! The engines themselves live in `eprint-index-core`. This crate supplies
//! the SQLite backends, the HTTP repository client, configuration, and the
//! `epx` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ PDS (XRPC)   │──▶│ SyncEngine   │──▶│ indexed_records│
//! └──────────────┘   └──────────────┘   └───────────────┘
//!                    ┌──────────────┐   ┌───────────────┐
//!    events ────────▶│ MetricsEngine│──▶│ counters/hll/ │
//!                    └──────────────┘   │ zset_entries  │
//!                                       └───────────────┘
//!                    ┌──────────────┐   ┌───────────────┐
//!    citations ─────▶│CitationEngine│──▶│ citations     │
//!                    └──────────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! epx init
//! epx index at://did:plc:abc/pub.chive.eprint.submission/3k2
//! epx check at://did:plc:abc/pub.chive.eprint.submission/3k2
//! epx metrics view at://did:plc:abc/pub.chive.eprint.submission/3k2 --actor did:plc:xyz
//! epx metrics trending --window 24h
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Record store and metrics snapshot sink |
//! | [`sqlite_counter`] | Counter store |
//! | [`sqlite_graph`] | Citation graph store |
//! | [`repository`] | HTTP client for PDS records |
//! | [`resilience`] | Retry with backoff |
//! | [`appview`] | Engine wiring |

pub mod appview;
pub mod citations_cmd;
pub mod config;
pub mod db;
pub mod metrics_cmd;
pub mod migrate;
pub mod repository;
pub mod resilience;
pub mod sqlite_counter;
pub mod sqlite_graph;
pub mod sqlite_store;
pub mod stats;
pub mod sync_cmd;
