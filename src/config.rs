//! Configuration management
//!
//! Layering, lowest priority first: built-in defaults, an optional config
//! file, `CRYPTOSCANNER__*` environment variables, then CLI arguments.
//! Credentials are not required at load time; stages resolve them when they
//! need them (see [`resolve_credential`]).

use crate::error::{PipelineError, Result};
use crate::strategy::WindowScope;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_PROJECT: &str = "starlit-verve-458814-u9";
pub const DEFAULT_DATASET: &str = "cryptoscanner";

pub const DUNE_API_KEY_ENV: &str = "DUNE_API_KEY";
pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_TOKEN";
pub const TELEGRAM_CHAT_ID_ENV: &str = "TELEGRAM_CHAT_ID";
pub const BIGQUERY_TOKEN_ENV: &str = "BIGQUERY_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub market: MarketConfig,
    pub analytics: AnalyticsConfig,
    pub public_dataset: PublicDatasetConfig,
    pub indicator: IndicatorConfig,
    pub anomaly: AnomalyConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Project part of `<project>.<dataset>.<table>` identifiers
    pub project_id: String,
    /// Dataset holding all pipeline tables
    pub dataset: String,
    /// SQLite file backing the warehouse
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// 24h ticker endpoint (full snapshot)
    pub endpoint: String,
    /// Outbound request timeout
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Base query endpoint; `{query_id}/results` is appended
    pub endpoint: String,
    /// Query to ingest. The analytics ingest is skipped when unset.
    pub query_id: Option<String>,
    /// Falls back to `DUNE_API_KEY`
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublicDatasetConfig {
    pub enabled: bool,
    /// Query REST endpoint root
    pub endpoint: String,
    /// Project billed for the query; defaults to the warehouse project
    pub billing_project: Option<String>,
    /// Pre-issued bearer token; falls back to `BIGQUERY_ACCESS_TOKEN`
    pub access_token: Option<String>,
    /// Row cap of the fixed transactions query
    pub row_limit: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub fast_window: usize,
    pub slow_window: usize,
    pub window_scope: WindowScope,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Standard deviations above the batch mean before a value is flagged
    pub sigma: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_url: String,
    /// Falls back to `TELEGRAM_TOKEN`
    pub bot_token: Option<String>,
    /// Falls back to `TELEGRAM_CHAT_ID`
    pub chat_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            path: "cryptoscanner.db".to_string(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.binance.com/api/v3/ticker/24hr".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.dune.com/api/v1/query/".to_string(),
            query_id: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl Default for PublicDatasetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            billing_project: None,
            access_token: None,
            row_limit: 10_000,
            timeout_secs: 60,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            fast_window: 5,
            slow_window: 20,
            window_scope: WindowScope::Global,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { sigma: 2.0 }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: None,
            chat_id: None,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(env_source())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Load from default locations, falling back to built-in defaults
    pub fn load_default() -> anyhow::Result<Self> {
        let paths = [
            "cryptoscanner.toml",
            "config.toml",
            "~/.config/cryptoscanner/config.toml",
        ];

        for path in paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::load(expanded.as_ref());
            }
        }

        let settings = config::Config::builder().add_source(env_source()).build()?;
        let config: Config = settings.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Explicit values (CLI arguments) win over everything else
    pub fn with_overrides(
        mut self,
        project_id: Option<String>,
        dataset: Option<String>,
        warehouse_path: Option<String>,
    ) -> Result<Self> {
        if let Some(project_id) = project_id {
            self.warehouse.project_id = project_id;
        }
        if let Some(dataset) = dataset {
            self.warehouse.dataset = dataset;
        }
        if let Some(path) = warehouse_path {
            self.warehouse.path = path;
        }
        self.check()?;
        Ok(self)
    }

    fn check(&self) -> Result<()> {
        if self.indicator.fast_window == 0 || self.indicator.slow_window == 0 {
            return Err(PipelineError::Config("window sizes must be positive".to_string()));
        }
        if self.warehouse.project_id.is_empty() || self.warehouse.dataset.is_empty() {
            return Err(PipelineError::Config(
                "project_id and dataset must not be empty".to_string(),
            ));
        }
        if !self.anomaly.sigma.is_finite() || self.anomaly.sigma < 0.0 {
            return Err(PipelineError::Config("anomaly.sigma must be >= 0".to_string()));
        }
        Ok(())
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix("CRYPTOSCANNER")
        .prefix_separator("__")
        .separator("__")
}

/// Resolve a credential: the explicit value if non-empty, else the named
/// environment variable. Absence is a fatal configuration error.
pub fn resolve_credential(explicit: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        return Ok(value.to_string());
    }
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::MissingCredential(env_var.to_string())),
    }
}
