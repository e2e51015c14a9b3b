//! TOML configuration for the `epx` binary.
//!
//! Only `[db]` is required; every other section falls back to the defaults
//! below. See `config/epx.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub citations: CitationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default = "default_plc_directory")]
    pub plc_directory: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            plc_directory: default_plc_directory(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_plc_directory() -> String {
    "https://plc.directory".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    "eprint-index".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            sweep_limit: default_sweep_limit(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    86_400
}
fn default_sweep_limit() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_attempt_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_max_trending_limit")]
    pub max_trending_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_trending_limit: default_max_trending_limit(),
        }
    }
}

fn default_max_trending_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CitationsConfig {
    #[serde(default = "default_page_limit")]
    pub default_page_limit: u32,
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,
}

impl Default for CitationsConfig {
    fn default() -> Self {
        Self {
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
        }
    }
}

fn default_page_limit() -> u32 {
    50
}
fn default_max_page_limit() -> u32 {
    100
}

impl Config {
    /// Defaults with the database at `./data/epx.sqlite`.
    pub fn minimal() -> Self {
        Self::with_db_path(PathBuf::from("./data/epx.sqlite"))
    }

    /// Defaults with the database at `path`.
    pub fn with_db_path(path: PathBuf) -> Self {
        Self {
            db: DbConfig { path },
            repository: RepositoryConfig::default(),
            sync: SyncConfig::default(),
            resilience: ResilienceConfig::default(),
            metrics: MetricsConfig::default(),
            citations: CitationsConfig::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.repository.timeout_secs == 0 {
        anyhow::bail!("repository.timeout_secs must be > 0");
    }

    if !config.repository.plc_directory.starts_with("http://")
        && !config.repository.plc_directory.starts_with("https://")
    {
        anyhow::bail!(
            "repository.plc_directory must be an http(s) URL, got '{}'",
            config.repository.plc_directory
        );
    }

    if config.sync.sweep_limit == 0 {
        anyhow::bail!("sync.sweep_limit must be > 0");
    }

    if config.resilience.attempt_timeout_secs == 0 {
        anyhow::bail!("resilience.attempt_timeout_secs must be > 0");
    }

    if !(1..=1000).contains(&config.metrics.max_trending_limit) {
        anyhow::bail!("metrics.max_trending_limit must be in [1, 1000]");
    }

    if config.citations.default_page_limit == 0 {
        anyhow::bail!("citations.default_page_limit must be >= 1");
    }

    if config.citations.default_page_limit > config.citations.max_page_limit {
        anyhow::bail!(
            "citations.default_page_limit ({}) must not exceed citations.max_page_limit ({})",
            config.citations.default_page_limit,
            config.citations.max_page_limit
        );
    }

    Ok(())
}
