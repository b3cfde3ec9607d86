//! Loads new posts or comments for dispatched objects and fans them out.

use anyhow::{Context, Result};
use clap::Parser;

use fbwatch_core::SystemClock;
use fbwatch_daemons::{bootstrap, connect_bus, connect_store, consumer_tag, shutdown_on_ctrl_c, CommonArgs};
use fbwatch_infra::content_source::GraphApiSource;
use fbwatch_infra::workers::{Consumer, FetchKind, Fetcher};

const BINARY: &str = "fb-fetcher";

#[derive(Parser)]
#[command(name = BINARY, about = "Fetch page feeds or comment threads")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// What to fetch: posts (page feeds) or comments (threads)
    #[arg(short = 't', long = "type", default_value = "posts")]
    kind: FetchKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap(BINARY, &cli.common)?;

    let tag = consumer_tag(BINARY);
    let store = connect_store(&config).await?;
    let bus = connect_bus(&config, &tag).await?;
    let source = GraphApiSource::new(&config.fb).context("cannot build content source")?;

    let fetcher = Fetcher::new(
        cli.kind,
        store,
        bus.clone(),
        source,
        SystemClock,
        config.fb.feed_max_items,
    );
    fetcher.declare_queues().await.context("cannot declare queues")?;

    Consumer::new(tag, bus, cli.kind.queue())
        .run(fetcher, shutdown_on_ctrl_c())
        .await;
    Ok(())
}
