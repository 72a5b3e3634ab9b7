use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub account: AccountConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Album-art selection policy for the `ExternalAdapter` browse surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AlbumArtType {
    Banner,
    Logo,
    ProgramThenLogo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Seconds subtracted from wall-clock to get the "live pointer".
    #[serde(default = "default_delay_sec")]
    pub delay_sec: i64,
    #[serde(default = "default_aa_type")]
    pub aa_type: AlbumArtType,
    /// How many days into the past a time-shift request may reach.
    #[serde(default = "default_timeshift_past_days")]
    pub timeshift_past_days: i64,
    /// How many days into the future a time-shift request may reach
    /// (0 means "must already be on-air or in the past").
    #[serde(default = "default_timeshift_future_days")]
    pub timeshift_future_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Areas (`JP1..JP47`) this instance is configured to serve.
    #[serde(default)]
    pub enabled_areas: BTreeSet<String>,
    /// Parallel-fetch concurrency cap for `CatalogFetcher::bootstrap` /
    /// `refresh_daily`.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountConfig {
    /// Both must be set for a premium login attempt.
    #[serde(default)]
    pub premium_mail: Option<String>,
    #[serde(default)]
    pub premium_pass: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            delay_sec: default_delay_sec(),
            aa_type: default_aa_type(),
            timeshift_past_days: default_timeshift_past_days(),
            timeshift_future_days: default_timeshift_future_days(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled_areas: BTreeSet::new(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_delay_sec() -> i64 {
    20
}

fn default_aa_type() -> AlbumArtType {
    AlbumArtType::ProgramThenLogo
}

fn default_timeshift_past_days() -> i64 {
    7
}

fn default_timeshift_future_days() -> i64 {
    0
}

fn default_fetch_concurrency() -> usize {
    5
}

impl AccountConfig {
    /// Both `premium_mail` and `premium_pass` must be present to attempt login.
    pub fn login_credentials(&self) -> Option<(&str, &str)> {
        match (&self.premium_mail, &self.premium_pass) {
            (Some(m), Some(p)) if !m.is_empty() && !p.is_empty() => Some((m, p)),
            _ => None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            stream: StreamConfig::default(),
            catalog: CatalogConfig::default(),
            account: AccountConfig::default(),
        }
    }
}
