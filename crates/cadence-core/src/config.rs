//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CadenceError, Result};
use crate::types::Benefit;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_refresh_rate_minutes")]
    pub default_refresh_rate_minutes: u64,
    #[serde(default = "default_max_daily_articles")]
    pub max_daily_articles_default: u32,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub benefits: BenefitsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_refresh_rate_minutes() -> u64 { 10 }
fn default_max_daily_articles() -> u32 { 50 }

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            default_refresh_rate_minutes: default_refresh_rate_minutes(),
            max_daily_articles_default: default_max_daily_articles(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            broker: BrokerConfig::default(),
            benefits: BenefitsConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl CadenceConfig {
    /// Load config from the default path (~/.cadence/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CadenceError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CadenceError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_refresh_rate_minutes == 0 {
            return Err(CadenceError::Config(
                "default_refresh_rate_minutes must be greater than 0".into(),
            ));
        }
        if self.store.page_size == 0 {
            return Err(CadenceError::Config("store.page_size must be greater than 0".into()));
        }
        if self.broker.publish_concurrency == 0 {
            return Err(CadenceError::Config(
                "broker.publish_concurrency must be greater than 0".into(),
            ));
        }
        if !matches!(self.broker.mode.as_str(), "memory" | "http") {
            return Err(CadenceError::Config(format!(
                "broker.mode must be \"memory\" or \"http\", got \"{}\"",
                self.broker.mode
            )));
        }
        if !matches!(self.benefits.source.as_str(), "static" | "http") {
            return Err(CadenceError::Config(format!(
                "benefits.source must be \"static\" or \"http\", got \"{}\"",
                self.benefits.source
            )));
        }
        if self.scheduler.extra_rates_seconds.contains(&0) {
            return Err(CadenceError::Config(
                "scheduler.extra_rates_seconds must not contain 0".into(),
            ));
        }
        Ok(())
    }

    /// The default tier, in seconds.
    pub fn default_refresh_rate_seconds(&self) -> u64 {
        self.default_refresh_rate_minutes * 60
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// Expand `~` in configured paths.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Tier engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Rates ticked in addition to the default and every schedule rate.
    #[serde(default)]
    pub extra_rates_seconds: Vec<u64>,
    /// Fire every tier once immediately instead of waiting a full interval.
    #[serde(default = "bool_true")]
    pub run_on_start: bool,
}

fn bool_true() -> bool { true }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            extra_rates_seconds: Vec::new(),
            run_on_start: true,
        }
    }
}

/// Feed store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Feeds materialized per cursor page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_store_path() -> String { "~/.cadence/cadence.db".into() }
fn default_page_size() -> usize { 100 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            page_size: default_page_size(),
        }
    }
}

/// Broker publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// "memory" or "http".
    #[serde(default = "default_broker_mode")]
    pub mode: String,
    /// Base URL for the http publisher.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_publish_concurrency")]
    pub publish_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_broker_mode() -> String { "memory".into() }
fn default_publish_concurrency() -> usize { 16 }
fn default_timeout_secs() -> u64 { 10 }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: default_broker_mode(),
            endpoint: String::new(),
            publish_concurrency: default_publish_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Where per-user benefits come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenefitsConfig {
    /// "static" or "http".
    #[serde(default = "default_benefits_source")]
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Benefits used by the static source.
    #[serde(default)]
    pub users: Vec<Benefit>,
}

fn default_benefits_source() -> String { "static".into() }

impl Default for BenefitsConfig {
    fn default() -> Self {
        Self {
            source: default_benefits_source(),
            url: String::new(),
            timeout_secs: default_timeout_secs(),
            users: Vec::new(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3030 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}
