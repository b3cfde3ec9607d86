//! Flags new records that closely match recently indexed content.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fbwatch_core::SystemClock;
use fbwatch_daemons::{bootstrap, connect_bus, consumer_tag, search_index, shutdown_on_ctrl_c, CommonArgs};
use fbwatch_events::{WorkQueue, COMMENTS_CLASSIFY};
use fbwatch_infra::classification_sink::TracingSink;
use fbwatch_infra::workers::{Classifier, ClassifierSettings, Consumer};

const BINARY: &str = "fb-classifier";

#[derive(Parser)]
#[command(name = BINARY, about = "Classify new content by similarity to recent content")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap(BINARY, &cli.common)?;
    let settings = ClassifierSettings::from_config(&config)?;
    info!(
        discard_score = settings.thresholds.discard_score(),
        match_score = settings.thresholds.match_score(),
        retention_days = settings.retention_days,
        minimum_should_match = %settings.similarity.minimum_should_match,
        "classification thresholds"
    );

    let tag = consumer_tag(BINARY);
    let bus = connect_bus(&config, &tag).await?;
    bus.declare(COMMENTS_CLASSIFY).await.context("cannot declare queue")?;

    let classifier = Classifier::new(search_index(&config)?, TracingSink, SystemClock, settings);
    Consumer::new(tag, bus, COMMENTS_CLASSIFY)
        .run(classifier, shutdown_on_ctrl_c())
        .await;
    Ok(())
}
