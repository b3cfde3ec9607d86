//! TOML configuration shared by every daemon.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fbwatch_core::{Thresholds, DEFAULT_INDEX_PREFIX};

use crate::search_index::SimilarityParams;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fbbotscan.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fb: FbConfig,
    #[serde(default)]
    pub amqp: BusConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub es: EsConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Content source credentials and fetch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FbConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_feed_check_seconds")]
    pub feed_check_seconds: u64,
    #[serde(default = "default_comments_check_seconds")]
    pub comments_check_seconds: u64,
    #[serde(default = "default_feed_max_items")]
    pub feed_max_items: usize,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_page_size_feed")]
    pub page_size_feed: u32,
    #[serde(default = "default_page_size_comments")]
    pub page_size_comments: u32,
}

fn default_feed_check_seconds() -> u64 { 300 }
fn default_comments_check_seconds() -> u64 { 60 }
fn default_feed_max_items() -> usize { 5 }
fn default_graph_url() -> String { "https://graph.facebook.com/v2.10".into() }
fn default_page_size_feed() -> u32 { 4 }
fn default_page_size_comments() -> u32 { 20 }

impl Default for FbConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            feed_check_seconds: default_feed_check_seconds(),
            comments_check_seconds: default_comments_check_seconds(),
            feed_max_items: default_feed_max_items(),
            graph_url: default_graph_url(),
            page_size_feed: default_page_size_feed(),
            page_size_comments: default_page_size_comments(),
        }
    }
}

impl FbConfig {
    pub fn feed_interval(&self) -> Duration {
        Duration::seconds(self.feed_check_seconds as i64)
    }

    pub fn comments_interval(&self) -> Duration {
        Duration::seconds(self.comments_check_seconds as i64)
    }
}

/// Message bus endpoint. The section keeps its historical `[amqp]` name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_uri")]
    pub uri: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_bus_uri() -> String { "redis://127.0.0.1:6379".into() }
fn default_max_retries() -> u32 { 5 }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            uri: default_bus_uri(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(rename = "type", default = "default_db_type")]
    pub kind: String,
    #[serde(default = "default_connstr")]
    pub connstr: String,
}

fn default_db_type() -> String { "postgres".into() }
fn default_connstr() -> String { "postgres://localhost/fbbotscan".into() }

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            kind: default_db_type(),
            connstr: default_connstr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
}

fn default_es_url() -> String { "http://127.0.0.1:9200".into() }
fn default_index_prefix() -> String { DEFAULT_INDEX_PREFIX.into() }

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            index_prefix: default_index_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    #[serde(default = "default_discard_score")]
    pub discard_score: f64,
    #[serde(default = "default_match_score")]
    pub match_score: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(flatten)]
    pub similarity: SimilarityParams,
}

fn default_discard_score() -> f64 { 0.5 }
fn default_match_score() -> f64 { 0.8 }
fn default_retention_days() -> u32 { 2 }

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            discard_score: default_discard_score(),
            match_score: default_match_score(),
            retention_days: default_retention_days(),
            similarity: SimilarityParams::default(),
        }
    }
}

impl ClassifyConfig {
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::new(self.discard_score, self.match_score)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
}

fn default_poll_interval_seconds() -> u64 { 5 }
fn default_lease_seconds() -> u64 { 600 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.poll_interval_seconds)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_seconds as i64)
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.classify.thresholds()?;

        if self.fb.feed_check_seconds == 0 || self.fb.comments_check_seconds == 0 {
            return Err(ConfigError::Invalid("check intervals must be > 0".into()));
        }
        if self.fb.feed_max_items == 0 {
            return Err(ConfigError::Invalid("fb.feed_max_items must be > 0".into()));
        }
        if self.scheduler.poll_interval_seconds == 0 || self.scheduler.lease_seconds == 0 {
            return Err(ConfigError::Invalid(
                "scheduler poll interval and lease must be > 0".into(),
            ));
        }
        if self.classify.retention_days == 0 {
            return Err(ConfigError::Invalid("classify.retention_days must be >= 1".into()));
        }

        for (name, value) in [
            ("amqp.uri", &self.amqp.uri),
            ("db.connstr", &self.db.connstr),
            ("es.url", &self.es.url),
            ("es.index_prefix", &self.es.index_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if self.db.kind != "postgres" {
            return Err(ConfigError::Invalid(format!(
                "unsupported db.type '{}' (expected postgres)",
                self.db.kind
            )));
        }

        Ok(())
    }
}
