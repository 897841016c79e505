//! Configuration loading.
//!
//! Settings come from an optional TOML file; `DATABASE_URL` and `PORT` from the
//! environment take precedence over the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cache::JobSettings;

const DEFAULT_CONFIG_FILE: &str = "feedback-summary.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub summary: SummaryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Organisations whose summaries are not served.
    #[serde(default)]
    pub hidden_organisations: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hidden_organisations: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Feedback targets with fewer feedbacks than this have their answers hidden.
    #[serde(default = "default_min_feedback_count")]
    pub min_feedback_count: u64,

    #[serde(default = "default_true")]
    pub include_all_time: bool,

    /// First day of the all-time window, `YYYY-MM-DD`.
    #[serde(default = "default_all_time_start")]
    pub all_time_start: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            upstream_timeout_ms: default_upstream_timeout_ms(),
            min_feedback_count: default_min_feedback_count(),
            include_all_time: true,
            all_time_start: default_all_time_start(),
        }
    }
}

impl SummaryConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn all_time_start_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.all_time_start, "%Y-%m-%d").with_context(|| {
            format!(
                "invalid summary.all_time_start value {:?}, expected YYYY-MM-DD",
                self.all_time_start
            )
        })
    }
}

fn default_upstream_timeout_ms() -> u64 {
    5000
}

fn default_min_feedback_count() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_all_time_start() -> String {
    "2017-01-01".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Daily run time, `HH:MM` in UTC.
    #[serde(default = "default_run_at")]
    pub run_at: String,

    #[serde(default)]
    pub run_on_start: bool,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            run_on_start: false,
            concurrency: default_concurrency(),
        }
    }
}

impl CacheConfig {
    pub fn run_at_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.run_at, "%H:%M")
            .with_context(|| format!("invalid cache.run_at value {:?}, expected HH:MM", self.run_at))
    }
}

fn default_run_at() -> String {
    "06:30".to_string()
}

fn default_concurrency() -> usize {
    4
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse configuration")
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Explicit path, else `feedback-summary.toml` when present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("no config file, using defaults");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("invalid PORT value {port:?}"))?;
            info!(port = self.server.port, "port taken from environment");
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn job_settings(&self) -> Result<JobSettings> {
        let all_time_since = if self.summary.include_all_time {
            Some(self.summary.all_time_start_date()?)
        } else {
            None
        };

        Ok(JobSettings {
            concurrency: self.cache.concurrency,
            all_time_since,
        })
    }
}
