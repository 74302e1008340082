use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use timeboost_client::{BidderClient, HttpClient};
use timeboost_contract::AlloyAuction;
use timeboost_types::{Address, Signer, U256};
use timeboost_utils::types::logging;
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
struct Cli {
    /// JSON-RPC endpoint of the chain.
    #[clap(long)]
    rpc_url: Url,

    /// Address of the auction contract.
    #[clap(long)]
    auction_contract: Address,

    /// Key of the bidding account.
    #[clap(long, env = "BIDDER_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Base URL of the bid validator.
    #[clap(long, default_value = "http://127.0.0.1:8800/")]
    validator_url: Url,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add to the deposit of the bidding account.
    Deposit { amount: U256 },

    /// Bid for the express lane of the next round.
    Bid {
        amount: U256,

        /// Account to control the lane if the bid wins.
        #[clap(long)]
        controller: Option<Address>,

        /// Top the deposit up to this amount first.
        #[clap(long)]
        deposit: Option<U256>,
    },

    /// Show the deposit of the bidding account.
    Balance,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let signer = Signer::from_str(&cli.private_key).context("invalid private key")?;
    let contract = Arc::new(AlloyAuction::with_signer(
        cli.rpc_url,
        signer.inner().clone(),
        cli.auction_contract,
        0,
    ));
    let submitter = HttpClient::new(cli.validator_url, Duration::from_secs(10))?;
    let client = BidderClient::new(signer, contract, submitter).await?;

    match cli.command {
        Command::Deposit { amount } => {
            client.deposit(amount).await?;
            info!(account = %client.address(), %amount, "deposited");
        }
        Command::Bid { amount, controller, deposit } => {
            if let Some(target) = deposit {
                client.ensure_deposit(target).await?;
            }
            let bid = match controller {
                Some(c) => client.bid_for(c, amount).await?,
                None => client.bid(amount).await?,
            };
            info!(round = %bid.bid().round(), %amount, "bid accepted");
        }
        Command::Balance => {
            let b = client.balance().await?;
            println!("{b}");
        }
    }

    Ok(())
}
