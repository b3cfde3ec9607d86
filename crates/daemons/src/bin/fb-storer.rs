//! Indexes fetched records into the current day's search index.

use anyhow::{Context, Result};
use clap::Parser;

use fbwatch_core::SystemClock;
use fbwatch_daemons::{bootstrap, connect_bus, consumer_tag, search_index, shutdown_on_ctrl_c, CommonArgs};
use fbwatch_events::{WorkQueue, COMMENTS_STORE};
use fbwatch_infra::workers::{Consumer, Storer};

const BINARY: &str = "fb-storer";

#[derive(Parser)]
#[command(name = BINARY, about = "Store fetched posts and comments in the search index")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap(BINARY, &cli.common)?;

    let tag = consumer_tag(BINARY);
    let bus = connect_bus(&config, &tag).await?;
    bus.declare(COMMENTS_STORE).await.context("cannot declare queue")?;

    let storer = Storer::new(search_index(&config)?, SystemClock, config.es.index_prefix.clone());
    Consumer::new(tag, bus, COMMENTS_STORE)
        .run(storer, shutdown_on_ctrl_c())
        .await;
    Ok(())
}
