use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use timeboost::api::{self, BidApi};
use timeboost_auction::{AuctioneerServer, BidQueue, BidValidator, ResolutionStore};
use timeboost_config::AuctionNodeConfig;
use timeboost_contract::{AlloyAuction, AuctionContract, MemoryAuction};
use timeboost_types::{Address, RoundTimingInfo, Signer, Timestamp, U256};
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

    /// Name of this replica in the leader lease.
    #[clap(long)]
    instance: Option<String>,

    /// Key of the account that settles auction rounds.
    #[clap(long, env = "AUCTIONEER_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Run against an in-process auction contract instead of the chain.
    #[clap(long, default_value_t = false)]
    memory_contract: bool,

    /// Round duration of the in-process contract.
    #[clap(long, default_value_t = 60_000)]
    round_ms: u64,

    /// Closing window of the in-process contract.
    #[clap(long, default_value_t = 15_000)]
    closing_ms: u64,

    /// Accounts given a deposit in the in-process contract.
    #[clap(long)]
    fund: Vec<Address>,

    /// Deposit of every funded account.
    #[clap(long, default_value_t = U256::from(1_000_000_000u64))]
    fund_amount: U256,
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
    if let Some(i) = cli.instance.clone() {
        cfg.auctioneer.instance = Some(i)
    }

    if cli.memory_contract {
        let timing = RoundTimingInfo::new(
            Timestamp::now(),
            Duration::from_millis(cli.round_ms),
            Duration::from_millis(cli.closing_ms),
            Duration::ZERO,
        )?;
        let contract = MemoryAuction::new(cfg.chain.id, cfg.chain.auction_contract, timing);
        for a in &cli.fund {
            contract.deposit(*a, cli.fund_amount).await?;
            info!(account = %a, amount = %cli.fund_amount, "funded account");
        }
        run(cfg, Arc::new(contract)).await
    } else {
        let key = cli
            .private_key
            .context("a private key is required to settle rounds on chain")?;
        let signer = Signer::from_str(&key).context("invalid private key")?;
        let contract = AlloyAuction::with_signer(
            cfg.chain.rpc_url.clone(),
            signer.inner().clone(),
            cfg.chain.auction_contract,
            cfg.chain.from_block,
        );
        run(cfg, Arc::new(contract)).await
    }
}

async fn run<C: AuctionContract>(cfg: AuctionNodeConfig, contract: Arc<C>) -> Result<()> {
    let metrics = Arc::new(PrometheusMetrics::default());

    let queue = BidQueue::open(cfg.queue_dir()).await?;
    let store = Arc::new(ResolutionStore::open(cfg.store_dir()).await?);

    let validator = BidValidator::new(
        cfg.validator_config(),
        contract.clone(),
        queue.clone(),
        &*metrics,
    )
    .await?;

    let auctioneer = AuctioneerServer::new(
        cfg.auctioneer_config(),
        contract,
        queue,
        store.clone(),
        &*metrics,
    )
    .await?;

    let api = BidApi::builder()
        .validator(Arc::new(validator))
        .store(store)
        .metrics(metrics)
        .build();

    info!(address = %cfg.http.address, "auctioneer started");

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

    auctioneer.shutdown().await;
    Ok(())
}
