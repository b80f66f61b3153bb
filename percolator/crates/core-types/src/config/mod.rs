use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Hard ceiling on truth-table columns; `2^20` rows is the most a single
/// filter may cost during canonicalization.
pub const MAX_CONDITIONS_CEILING: usize = 20;

/// Global configuration root loaded from `.env` + `config/percolator.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub reindex: ReindexSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Canonicalization limits and content-hash salt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Leaf conditions a single filter may carry through the truth table.
    #[serde(default = "default_max_conditions")]
    pub max_conditions: usize,
    /// AND-clauses allowed in a canonical filter; 0 disables the check.
    #[serde(default = "default_max_min_terms")]
    pub max_min_terms: usize,
    /// Mixed into every content hash; peers must share it to agree on ids.
    #[serde(default)]
    pub hash_seed: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_conditions: default_max_conditions(),
            max_min_terms: default_max_min_terms(),
            hash_seed: String::new(),
        }
    }
}

fn default_max_conditions() -> usize {
    12
}
fn default_max_min_terms() -> usize {
    256
}

/// Test-table compaction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexSection {
    /// Fraction of removed entries (filters or conditions) that flags a
    /// namespace for compaction.
    #[serde(default = "default_reindex_threshold")]
    pub threshold: f64,
    /// Period of the background sweeper, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for ReindexSection {
    fn default() -> Self {
        Self {
            threshold: default_reindex_threshold(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_reindex_threshold() -> f64 {
    0.1
}
fn default_sweep_interval() -> u64 {
    500
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "text"
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_latency_buckets")]
    pub test_latency_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            test_latency_buckets: default_latency_buckets(),
        }
    }
}

fn default_latency_buckets() -> Vec<f64> {
    vec![0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05]
}

static CONFIG: Lazy<RwLock<AppConfig>> = Lazy::new(|| RwLock::new(AppConfig::default()));

/// Load configuration from .env and a TOML file (default: `config/percolator.toml`).
///
/// Returns a clone of the current configuration.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let _ = dotenvy::dotenv();
    reload_config(path)
}

/// Force reload configuration from disk.
pub fn reload_config(path: Option<&Path>) -> Result<AppConfig> {
    let target = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut lock = CONFIG
        .write()
        .map_err(|_| anyhow::anyhow!("config lock poisoned"))?;

    let mut cfg = if target.exists() {
        let raw = fs::read_to_string(&target)?;
        toml::from_str(&raw)?
    } else {
        // If no file, start from what we have (defaults or previous)
        lock.clone()
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;

    *lock = cfg.clone();
    Ok(cfg)
}

impl AppConfig {
    /// Validate configuration constraints.
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_conditions == 0 {
            return Err(anyhow::anyhow!("engine.max_conditions must be at least 1"));
        }
        if self.engine.max_conditions > MAX_CONDITIONS_CEILING {
            return Err(anyhow::anyhow!(
                "engine.max_conditions cannot exceed {MAX_CONDITIONS_CEILING}"
            ));
        }
        if !(self.reindex.threshold > 0.0 && self.reindex.threshold <= 1.0) {
            return Err(anyhow::anyhow!(
                "reindex.threshold must be in (0, 1], got {}",
                self.reindex.threshold
            ));
        }
        if self.reindex.sweep_interval_ms == 0 {
            return Err(anyhow::anyhow!("reindex.sweep_interval_ms must be non-zero"));
        }
        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(anyhow::anyhow!(
                "logging.format must be \"json\" or \"text\", got {:?}",
                self.logging.format
            ));
        }
        Ok(())
    }
}

/// Environment variables win over the file so deployments can tweak a shared config.
fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(level) = std::env::var("PERCOLATOR_LOG_LEVEL") {
        if !level.is_empty() {
            cfg.logging.level = level;
        }
    }
    if let Ok(seed) = std::env::var("PERCOLATOR_HASH_SEED") {
        cfg.engine.hash_seed = seed;
    }
}

/// Default configuration path: `$PERCOLATOR_CONFIG` when set, else a relative
/// `config/percolator.toml` (developer runs).
pub fn default_config_path() -> PathBuf {
    std::env::var("PERCOLATOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/percolator.toml"))
}
