//! # Eprint Index CLI (`epx`)
//!
//! The `epx` binary drives the index: schema setup, record sync against
//! personal data servers, engagement metrics, and the citation graph.
//!
//! ## Usage
//!
//! ```bash
//! epx --config ./config/epx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `epx init` | Create the SQLite database and run schema migrations |
//! | `epx index <uri>` | Fetch a record from its PDS and index it |
//! | `epx delete <uri>` | Remove a record from the index and the graph |
//! | `epx check <uri>` | Compare the indexed CID with the PDS |
//! | `epx refresh <uri>` | Re-fetch a record if its CID changed |
//! | `epx sweep` | Refresh records not verified within the stale age |
//! | `epx pds add\|list` | Manage the PDS registry |
//! | `epx metrics ...` | Record events, read aggregates and trending |
//! | `epx citations ...` | Import and query the citation graph |
//! | `epx stats` | Database overview |
//!
//! ## Logging
//!
//! Logs go to stderr. Filter with `RUST_LOG`; set `EPX_LOG_FORMAT=json`
//! for structured output.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use eprint_index::{citations_cmd, config, metrics_cmd, migrate, stats, sync_cmd};
use eprint_index_core::models::MetricEvent;

/// Eprint Index CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/epx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "epx",
    about = "Eprint Index: derived state for eprints on a decentralized network",
    version,
    long_about = "Eprint Index keeps a local cache of eprint records in step with the \
    personal data servers that own them, counts engagement with unique-visitor estimates \
    and trending windows, and maintains a citation graph between indexed eprints."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/epx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Fetch a record from its PDS and index it.
    Index {
        /// Record URI (`at://{did}/{collection}/{rkey}`).
        uri: String,

        /// PDS endpoint to fetch from, skipping DID resolution.
        #[arg(long)]
        pds: Option<String>,
    },

    /// Remove a record from the index and the citation graph.
    Delete { uri: String },

    /// Compare the indexed CID with the authoritative one. Prints JSON.
    Check { uri: String },

    /// Re-fetch a record and update the index if its CID changed.
    Refresh {
        uri: String,

        /// Retry transient failures with backoff (see `[resilience]`).
        #[arg(long)]
        retry: bool,
    },

    /// Refresh records not verified within the stale age.
    Sweep {
        /// Override `[sync].stale_after_secs`.
        #[arg(long)]
        max_age_secs: Option<u64>,

        /// Override `[sync].sweep_limit`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage the registry of known PDS endpoints.
    Pds {
        #[command(subcommand)]
        action: PdsAction,
    },

    /// Record engagement events and read aggregates.
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// Import and query the citation graph.
    Citations {
        #[command(subcommand)]
        action: CitationsAction,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum PdsAction {
    /// Register an endpoint (`http://` or `https://`).
    Add { url: String },
    /// List registered endpoints.
    List,
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Record a view.
    View {
        uri: String,
        /// Viewer identity for unique-view counting.
        #[arg(long)]
        actor: Option<String>,
    },
    /// Record a download.
    Download {
        uri: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Record a dwell-time sample in milliseconds.
    Dwell { uri: String, ms: u64 },
    /// Record a click-through from search results.
    SearchClick { uri: String },
    /// Record a download from search results.
    SearchDownload { uri: String },
    /// Record a JSON array of events in one atomic batch.
    Batch { file: PathBuf },
    /// Print aggregated metrics for a subject as JSON.
    Show { uri: String },
    /// Print the most-viewed subjects in a window as JSON.
    Trending {
        /// `24h`, `7d`, or `30d`.
        #[arg(long, default_value = "24h")]
        window: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Snapshot every subject's aggregates into `metric_snapshots`.
    Flush,
}

#[derive(Subcommand)]
enum CitationsAction {
    /// Register a paper as a graph entity without indexing it.
    Register { uri: String },
    /// Upsert a JSON array of citations.
    Import { file: PathBuf },
    /// Papers citing `uri`.
    Citing {
        uri: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Papers `uri` cites.
    References {
        uri: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Papers cited together with `uri`.
    Cocited {
        uri: String,
        #[arg(long, default_value_t = 1)]
        min: u64,
    },
    /// Delete every citation touching `uri`.
    Delete { uri: String },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "eprint_index=info,eprint_index_core=info".into());

    let json = std::env::var("EPX_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { uri, pds } => {
            sync_cmd::run_index(&cfg, &uri, pds.as_deref()).await?;
        }
        Commands::Delete { uri } => {
            sync_cmd::run_delete(&cfg, &uri).await?;
        }
        Commands::Check { uri } => {
            sync_cmd::run_check(&cfg, &uri).await?;
        }
        Commands::Refresh { uri, retry } => {
            sync_cmd::run_refresh(&cfg, &uri, retry).await?;
        }
        Commands::Sweep {
            max_age_secs,
            limit,
        } => {
            sync_cmd::run_sweep(&cfg, max_age_secs, limit).await?;
        }
        Commands::Pds { action } => match action {
            PdsAction::Add { url } => sync_cmd::run_pds_add(&cfg, &url).await?,
            PdsAction::List => sync_cmd::run_pds_list(&cfg).await?,
        },
        Commands::Metrics { action } => match action {
            MetricsAction::View { uri, actor } => {
                metrics_cmd::run_record(&cfg, MetricEvent::View { uri, actor_id: actor }).await?;
            }
            MetricsAction::Download { uri, actor } => {
                metrics_cmd::run_record(&cfg, MetricEvent::Download { uri, actor_id: actor })
                    .await?;
            }
            MetricsAction::Dwell { uri, ms } => {
                metrics_cmd::run_record(
                    &cfg,
                    MetricEvent::DwellTime {
                        uri,
                        duration_ms: ms,
                    },
                )
                .await?;
            }
            MetricsAction::SearchClick { uri } => {
                metrics_cmd::run_record(&cfg, MetricEvent::SearchClick { uri }).await?;
            }
            MetricsAction::SearchDownload { uri } => {
                metrics_cmd::run_record(&cfg, MetricEvent::SearchDownload { uri }).await?;
            }
            MetricsAction::Batch { file } => {
                metrics_cmd::run_record_batch(&cfg, &file).await?;
            }
            MetricsAction::Show { uri } => {
                metrics_cmd::run_show(&cfg, &uri).await?;
            }
            MetricsAction::Trending { window, limit } => {
                metrics_cmd::run_trending(&cfg, &window, limit).await?;
            }
            MetricsAction::Flush => {
                metrics_cmd::run_flush(&cfg).await?;
            }
        },
        Commands::Citations { action } => match action {
            CitationsAction::Register { uri } => {
                citations_cmd::run_register(&cfg, &uri).await?;
            }
            CitationsAction::Import { file } => {
                citations_cmd::run_import(&cfg, &file).await?;
            }
            CitationsAction::Citing { uri, limit, offset } => {
                citations_cmd::run_citing(&cfg, &uri, limit, offset).await?;
            }
            CitationsAction::References { uri, limit, offset } => {
                citations_cmd::run_references(&cfg, &uri, limit, offset).await?;
            }
            CitationsAction::Cocited { uri, min } => {
                citations_cmd::run_cocited(&cfg, &uri, min).await?;
            }
            CitationsAction::Delete { uri } => {
                citations_cmd::run_delete(&cfg, &uri).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
