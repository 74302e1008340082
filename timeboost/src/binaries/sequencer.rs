use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use timeboost::api::{self, ExpressLaneApi};
use timeboost_config::SequencerNodeConfig;
use timeboost_contract::AlloyAuction;
use timeboost_sequencer::Sequencer;
use timeboost_utils::types::{logging, prometheus::PrometheusMetrics};
use tokio::{select, signal};
use tracing::{error, info};

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
    let mut cfg = SequencerNodeConfig::read(&cli.config)
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

    let mut sequencer = Sequencer::new(cfg.gate_config(), contract, &*metrics).await?;

    let api = ExpressLaneApi::builder()
        .gate(sequencer.gate().clone())
        .metrics(metrics)
        .build();

    let server = tokio::spawn(api::serve(api.router(), cfg.http.address));

    info!(address = %cfg.http.address, "sequencer started");

    loop {
        select! {
            out = sequencer.next_output() => match out {
                Ok(o) => info!(
                    round    = %o.round,
                    position = o.position,
                    boosted  = o.boosted,
                    len      = o.transaction.len(),
                    "sequenced"
                ),
                Err(err) => {
                    error!(%err, "sequencer failed");
                    break
                }
            },
            _ = signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break
            }
        }
    }

    server.abort();
    Ok(())
}
