use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use timeboost::api::{self, BidApi};
use timeboost_auction::{BidQueue, BidValidator};
use timeboost_config::AuctionNodeConfig;
use timeboost_contract::AlloyAuction;
use timeboost_utils::types::{logging, prometheus::PrometheusMetrics};
use tokio::{select, signal};
use tracing::{error, info};

/// Validates bids and hands them to an auctioneer sharing the data directory.
#[derive(Parser, Debug)]
struct Cli {
    /// Path to the node configuration file.
    #[clap(long, short)]
    config: PathBuf,

    /// Overrides the configured API address.
    #[clap(long)]
    http_address: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut cfg = AuctionNodeConfig::read(&cli.config)
        .await
        .with_context(|| format!("could not read config {:?}", cli.config))?;
    if let Some(a) = cli.http_address {
        cfg.http.address = a
    }

    let metrics = Arc::new(PrometheusMetrics::default());
    let contract = Arc::new(AlloyAuction::new(
        cfg.chain.rpc_url.clone(),
        cfg.chain.auction_contract,
        cfg.chain.from_block,
    ));
    let queue = BidQueue::open(cfg.queue_dir()).await?;
    let validator = BidValidator::new(cfg.validator_config(), contract, queue, &*metrics).await?;

    let api = BidApi::builder()
        .validator(Arc::new(validator))
        .metrics(metrics)
        .build();

    info!(address = %cfg.http.address, "bid validator started");

    select! {
        r = api::serve(api.router(), cfg.http.address) => {
            if let Err(err) = r {
                error!(%err, "api server failed");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received ctrl-c; shutting down");
        }
    }

    Ok(())
}
