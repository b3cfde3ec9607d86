//! Shared bootstrap for the pipeline daemons.
//!
//! Every binary takes `-f <config>` and `-l <level>`, logs JSON to stdout,
//! and stops on ctrl-c after the in-flight delivery is settled.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use fbwatch_infra::config::{Config, DEFAULT_CONFIG_PATH};
use fbwatch_infra::event_bus::RedisStreamsWorkQueue;
use fbwatch_infra::metadata_store::PostgresMetadataStore;
use fbwatch_infra::search_index::ElasticsearchIndex;
use fbwatch_infra::workers::Shutdown;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Path to the TOML config file
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (debug, info, warn, error); RUST_LOG overrides it
    #[arg(short = 'l', long = "log-level", default_value = "error")]
    pub log_level: String,
}

/// Install logging and load the config.
pub fn bootstrap(binary: &str, args: &CommonArgs) -> Result<Config> {
    fbwatch_observability::init(&args.log_level)?;

    let config = Config::load_from(&args.config)
        .with_context(|| format!("cannot load config from {}", args.config.display()))?;
    info!(binary, config = %args.config.display(), "config loaded");
    Ok(config)
}

/// Per-process consumer name, `<binary>-<uuid>`.
pub fn consumer_tag(binary: &str) -> String {
    format!("{binary}-{}", uuid::Uuid::now_v7())
}

pub async fn connect_bus(config: &Config, tag: &str) -> Result<RedisStreamsWorkQueue> {
    RedisStreamsWorkQueue::connect(&config.amqp.uri, tag, config.amqp.max_retries)
        .await
        .with_context(|| format!("cannot connect to message bus at {}", config.amqp.uri))
}

/// Connect to the metadata store and bring its schema up to date.
pub async fn connect_store(config: &Config) -> Result<PostgresMetadataStore> {
    let store = PostgresMetadataStore::connect(&config.db.connstr)
        .await
        .context("cannot connect to metadata store")?;
    store.migrate().await.context("cannot migrate metadata store")?;
    Ok(store)
}

pub fn search_index(config: &Config) -> Result<ElasticsearchIndex> {
    ElasticsearchIndex::new(config.es.url.clone())
        .with_context(|| format!("cannot build search client for {}", config.es.url))
}

/// A shutdown handle triggered by ctrl-c.
pub fn shutdown_on_ctrl_c() -> Shutdown {
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for interrupt; shutting down"),
        }
        trigger.trigger();
    });
    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn defaults_match_the_deployed_layout() {
        let cli = Cli::parse_from(["fb-storer"]);
        assert_eq!(cli.common.config, PathBuf::from("/etc/fbbotscan.toml"));
        assert_eq!(cli.common.log_level, "error");

        let cli = Cli::parse_from(["fb-storer", "-f", "/tmp/x.toml", "-l", "debug"]);
        assert_eq!(cli.common.config, PathBuf::from("/tmp/x.toml"));
        assert_eq!(cli.common.log_level, "debug");
    }

    #[test]
    fn consumer_tags_are_unique_per_process() {
        let a = consumer_tag("fb-fetcher");
        assert!(a.starts_with("fb-fetcher-"));
        assert_ne!(a, consumer_tag("fb-fetcher"));
    }
}
