use std::sync::Arc;

use async_trait::async_trait;
use timeboost_auction::BidValidator;
use timeboost_contract::AuctionContract;
use timeboost_types::rpc::BidReceipt;
use timeboost_types::{Address, Bid, ChainId, RoundTimingInfo, SignedBid, Signer, Timestamp, U256};
use tracing::{debug, info};

use crate::{ClientError, HttpClient};

/// Where bids are sent to.
#[async_trait]
pub trait BidSubmitter: Send + Sync {
    async fn submit_bid(&self, bid: SignedBid) -> Result<BidReceipt, ClientError>;
}

#[async_trait]
impl BidSubmitter for HttpClient {
    async fn submit_bid(&self, bid: SignedBid) -> Result<BidReceipt, ClientError> {
        self.post("v1/bids", &bid).await
    }
}

#[async_trait]
impl<C: AuctionContract> BidSubmitter for BidValidator<C> {
    async fn submit_bid(&self, bid: SignedBid) -> Result<BidReceipt, ClientError> {
        Ok(BidValidator::submit_bid(self, bid).await?)
    }
}

#[async_trait]
impl<T: BidSubmitter + ?Sized> BidSubmitter for Arc<T> {
    async fn submit_bid(&self, bid: SignedBid) -> Result<BidReceipt, ClientError> {
        (**self).submit_bid(bid).await
    }
}

/// Manages an auction deposit and places bids.
pub struct BidderClient<C, S> {
    signer: Signer,
    chain: ChainId,
    timing: RoundTimingInfo,
    contract: Arc<C>,
    submitter: S,
}

impl<C: AuctionContract, S: BidSubmitter> BidderClient<C, S> {
    pub async fn new(signer: Signer, contract: Arc<C>, submitter: S) -> Result<Self, ClientError> {
        let chain = contract.chain_id().await?;
        let timing = contract.round_timing_info().await?;
        Ok(Self {
            signer,
            chain,
            timing,
            contract,
            submitter,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn timing(&self) -> &RoundTimingInfo {
        &self.timing
    }

    pub async fn balance(&self) -> Result<U256, ClientError> {
        Ok(self.contract.balance_of(self.address()).await?)
    }

    /// Add `amount` to the deposit.
    pub async fn deposit(&self, amount: U256) -> Result<(), ClientError> {
        self.contract.deposit(self.address(), amount).await?;
        info!(bidder = %self.address(), %amount, "deposited");
        Ok(())
    }

    /// Top the deposit up to `target`.
    ///
    /// Nothing is deposited if the balance already covers it.
    pub async fn ensure_deposit(&self, target: U256) -> Result<U256, ClientError> {
        let balance = self.balance().await?;
        if balance >= target {
            debug!(bidder = %self.address(), %balance, "deposit sufficient");
            return Ok(balance);
        }
        self.deposit(target - balance).await?;
        Ok(target)
    }

    /// Bid `amount` for the round being auctioned, controlling it ourselves.
    pub async fn bid(&self, amount: U256) -> Result<SignedBid, ClientError> {
        self.bid_for(self.address(), amount).await
    }

    /// Bid `amount` for the round being auctioned on behalf of `controller`.
    pub async fn bid_for(&self, controller: Address, amount: U256) -> Result<SignedBid, ClientError> {
        let round = self.timing.auction_round(Timestamp::now());
        let bid = Bid::new(self.chain, self.contract.address(), self.address(), round, amount)
            .with_controller(controller)
            .sign(&self.signer)?;
        let receipt = self.submitter.submit_bid(bid.clone()).await?;
        info!(bidder = %self.address(), round = %receipt.round, %amount, "bid accepted");
        Ok(bid)
    }

    /// Deposit `deposit` and then bid `amount`.
    ///
    /// No bid is made if the deposit fails.
    pub async fn deposit_and_bid(&self, deposit: U256, amount: U256) -> Result<SignedBid, ClientError> {
        self.deposit(deposit).await?;
        self.bid(amount).await
    }
}
