//! Periodically dispatches stale pages and threads to the fetch queues.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fbwatch_core::SystemClock;
use fbwatch_daemons::{bootstrap, connect_bus, connect_store, consumer_tag, shutdown_on_ctrl_c, CommonArgs};
use fbwatch_infra::metadata_store::MetadataStore;
use fbwatch_infra::workers::{Scheduler, SchedulerSettings};

const BINARY: &str = "fb-scheduler";

#[derive(Parser)]
#[command(name = BINARY, about = "Dispatch stale pages and comment threads for fetching")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Register a page to monitor before scheduling (repeatable)
    #[arg(long = "add-page", value_name = "PAGE_ID")]
    add_page: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap(BINARY, &cli.common)?;

    let store = connect_store(&config).await?;
    for page_id in &cli.add_page {
        match store.add_page(page_id).await {
            Ok(()) => info!(page_id, "page registered"),
            Err(e) if e.is_duplicate() => info!(page_id, "page already registered"),
            Err(e) => return Err(e).with_context(|| format!("cannot register page {page_id}")),
        }
    }

    let bus = connect_bus(&config, &consumer_tag(BINARY)).await?;
    let scheduler = Scheduler::new(store, bus, SystemClock, SchedulerSettings::from(&config));
    scheduler.declare_queues().await.context("cannot declare fetch queues")?;

    scheduler.run(shutdown_on_ctrl_c()).await;
    Ok(())
}
