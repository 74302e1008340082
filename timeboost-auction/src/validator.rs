use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use timeboost_contract::{AuctionContract, ContractError};
use timeboost_types::rpc::BidReceipt;
use timeboost_types::{Address, ChainId, Round, RoundTimingInfo, SignedBid, Timestamp, U256};
use tracing::{debug, trace};

use crate::balance::BalanceCache;
use crate::config::ValidatorConfig;
use crate::metrics::ValidatorMetrics;
use crate::queue::{BidQueue, QueueError, QueuedBid};

/// Checks incoming bids and forwards valid ones to the bid queue.
///
/// Holds no auction state beyond per-round rate limits, so several
/// validators may share one queue.
pub struct BidValidator<C> {
    config: ValidatorConfig,
    timing: RoundTimingInfo,
    contract: Arc<C>,
    balances: BalanceCache<C>,
    queue: BidQueue,
    round: Mutex<RoundState>,
    metrics: ValidatorMetrics,
}

/// Limits of the round currently being auctioned.
#[derive(Debug, Default)]
struct RoundState {
    round: Round,
    reserve: Option<U256>,
    bids: HashMap<Address, usize>,
}

impl RoundState {
    fn enter(&mut self, r: Round) {
        if self.round != r {
            self.round = r;
            self.reserve = None;
            self.bids.clear();
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BidError {
    #[error("signature does not recover to bidder")]
    InvalidSignature,

    #[error("bid for auction contract {0} does not match")]
    WrongAuctionContract(Address),

    #[error("bid for chain {0} does not match")]
    WrongChainId(ChainId),

    #[error("bid names no express lane controller")]
    ZeroController,

    #[error("bid amount is zero")]
    ZeroAmount,

    #[error("bidder {0} has no deposit")]
    NotDepositor(Address),

    #[error("deposit {balance} does not cover bid {amount}")]
    InsufficientBalance { balance: U256, amount: U256 },

    #[error("auction for round {0} is closed")]
    AuctionClosed(Round),

    #[error("bid for round {got}, but round {expected} is being auctioned")]
    BadRound { expected: Round, got: Round },

    #[error("bid {amount} below reserve price {reserve}")]
    ReservePriceNotMet { reserve: U256, amount: U256 },

    #[error("bidder {0} exceeded the bids allowed per round")]
    TooManyBids(Address),

    #[error("contract unavailable: {0}")]
    Contract(#[from] ContractError),

    #[error("bid queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

impl BidError {
    /// Stable reason code reported to bidders.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid-signature",
            Self::WrongAuctionContract(_) => "wrong-auction-contract",
            Self::WrongChainId(_) => "wrong-chain-id",
            Self::ZeroController => "zero-controller",
            Self::ZeroAmount => "zero-amount",
            Self::NotDepositor(_) => "not-depositor",
            Self::InsufficientBalance { .. } => "insufficient-balance",
            Self::AuctionClosed(_) => "auction-closed",
            Self::BadRound { .. } => "bad-round",
            Self::ReservePriceNotMet { .. } => "reserve-price-not-met",
            Self::TooManyBids(_) => "too-many-bids",
            Self::Contract(_) => "contract-unavailable",
            Self::Queue(_) => "queue-unavailable",
        }
    }

    /// Is the rejection caused by the bid itself?
    pub fn is_invalid_bid(&self) -> bool {
        !matches!(self, Self::Contract(_) | Self::Queue(_))
    }
}

impl<C: AuctionContract> BidValidator<C> {
    pub async fn new<M>(
        cfg: ValidatorConfig,
        contract: Arc<C>,
        queue: BidQueue,
        metrics: &M,
    ) -> Result<Self, ContractError>
    where
        M: ::metrics::Metrics,
    {
        let timing = contract.round_timing_info().await?;
        Ok(Self {
            balances: BalanceCache::new(contract.clone(), cfg.balance_ttl),
            config: cfg,
            timing,
            contract,
            queue,
            round: Mutex::new(RoundState::default()),
            metrics: ValidatorMetrics::new(metrics),
        })
    }

    pub fn timing(&self) -> &RoundTimingInfo {
        &self.timing
    }

    pub async fn submit_bid(&self, bid: SignedBid) -> Result<BidReceipt, BidError> {
        self.submit_bid_at(bid, Timestamp::now()).await
    }

    /// Validate and enqueue `bid` as if received at `now`.
    pub async fn submit_bid_at(&self, bid: SignedBid, now: Timestamp) -> Result<BidReceipt, BidError> {
        match self.check_and_push(bid, now).await {
            Ok(r) => {
                self.metrics.accepted.add(1);
                debug!(round = %r.round, bidder = %r.bidder, amount = %r.amount, "bid accepted");
                Ok(r)
            }
            Err(e) => {
                self.metrics.rejected.add(1);
                debug!(err = %e, code = %e.code(), "bid rejected");
                Err(e)
            }
        }
    }

    async fn check_and_push(&self, bid: SignedBid, now: Timestamp) -> Result<BidReceipt, BidError> {
        if !bid.is_signed_by_bidder() {
            return Err(BidError::InvalidSignature);
        }
        if bid.auction() != self.config.auction {
            return Err(BidError::WrongAuctionContract(bid.auction()));
        }
        if bid.chain_id() != self.config.chain {
            return Err(BidError::WrongChainId(bid.chain_id()));
        }
        if bid.controller().is_zero() {
            return Err(BidError::ZeroController);
        }
        if bid.amount().is_zero() {
            return Err(BidError::ZeroAmount);
        }

        let balance = self.balance_for(bid.bidder(), bid.amount()).await?;
        if balance.is_zero() {
            return Err(BidError::NotDepositor(bid.bidder()));
        }
        if balance < bid.amount() {
            return Err(BidError::InsufficientBalance {
                balance,
                amount: bid.amount(),
            });
        }

        let expected = self.timing.auction_round(now);
        if self.timing.is_auction_closed(bid.round(), now) {
            return Err(BidError::AuctionClosed(bid.round()));
        }
        if bid.round() != expected {
            return Err(BidError::BadRound {
                expected,
                got: bid.round(),
            });
        }

        let reserve = self.reserve_price(expected).await?;
        if bid.amount() < reserve {
            return Err(BidError::ReservePriceNotMet {
                reserve,
                amount: bid.amount(),
            });
        }

        self.reserve_slot(expected, bid.bidder())?;

        let receipt = BidReceipt {
            round: bid.round(),
            bidder: bid.bidder(),
            amount: bid.amount(),
        };
        let queued = QueuedBid { bid, received: now };
        if let Err(e) = self.queue.push(&queued).await {
            self.release_slot(expected, queued.bid.bidder());
            return Err(e.into());
        }
        Ok(receipt)
    }

    async fn reserve_price(&self, r: Round) -> Result<U256, ContractError> {
        {
            let mut state = self.round.lock();
            state.enter(r);
            if let Some(p) = state.reserve {
                return Ok(p);
            }
        }
        self.metrics.auction_round.set(u64::from(r) as usize);
        let p = self.contract.reserve_price().await?;
        let mut state = self.round.lock();
        state.enter(r);
        state.reserve = Some(p);
        trace!(round = %r, reserve = %p, "reserve price");
        Ok(p)
    }

    /// A cached balance too low for a bid is read again, so a deposit made
    /// within the cache lifetime counts.
    async fn balance_for(&self, bidder: Address, amount: U256) -> Result<U256, BidError> {
        let balance = self.balances.balance(bidder).await?;
        if balance >= amount {
            return Ok(balance);
        }
        self.balances.invalidate(&bidder);
        Ok(self.balances.balance(bidder).await?)
    }

    fn reserve_slot(&self, r: Round, bidder: Address) -> Result<(), BidError> {
        let mut state = self.round.lock();
        state.enter(r);
        let n = state.bids.entry(bidder).or_default();
        if *n >= self.config.max_bids_per_sender {
            return Err(BidError::TooManyBids(bidder));
        }
        *n += 1;
        Ok(())
    }

    fn release_slot(&self, r: Round, bidder: Address) {
        let mut state = self.round.lock();
        if state.round == r {
            if let Some(n) = state.bids.get_mut(&bidder) {
                *n = n.saturating_sub(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use timeboost_contract::{AuctionContract, MemoryAuction};
    use timeboost_types::{Address, Bid, ChainId, Round, RoundTimingInfo, Signer, Timestamp, U256};

    use super::{BidError, BidValidator};
    use crate::config::ValidatorConfig;
    use crate::queue::BidQueue;

    const T0: u64 = 1_000_000;

    struct Setup {
        validator: BidValidator<MemoryAuction>,
        contract: Arc<MemoryAuction>,
        queue: BidQueue,
        auction: Address,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let timing = RoundTimingInfo::new(
            Timestamp::from_secs(T0),
            Duration::from_secs(60),
            Duration::from_secs(15),
            Duration::from_secs(15),
        )
        .unwrap();
        let auction = Signer::random().address();
        let contract = Arc::new(
            MemoryAuction::new(ChainId::from(1), auction, timing).with_reserve_price(U256::from(2)),
        );
        let queue = BidQueue::open(dir.path()).await.unwrap();
        let cfg = ValidatorConfig::builder()
            .chain(ChainId::from(1))
            .auction(auction)
            .max_bids_per_sender(2)
            .balance_ttl(Duration::ZERO)
            .build();
        let validator = BidValidator::new(cfg, contract.clone(), queue.clone(), &metrics::NoMetrics)
            .await
            .unwrap();
        Setup {
            validator,
            contract,
            queue,
            auction,
            _dir: dir,
        }
    }

    fn at(secs: u64) -> Timestamp {
        Timestamp::from_secs(T0 + secs)
    }

    fn bid(s: &Signer, auction: Address, round: u64, amount: u64) -> timeboost_types::SignedBid {
        Bid::new(ChainId::from(1), auction, s.address(), Round::from(round), U256::from(amount))
            .sign(s)
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_and_enqueues() {
        let s = setup().await;
        let a = Signer::random();
        s.contract.deposit(a.address(), U256::from(10)).await.unwrap();
        let r = s.validator.submit_bid_at(bid(&a, s.auction, 1, 5), at(10)).await.unwrap();
        assert_eq!(r.round, Round::from(1));
        let bids = s.queue.consumer().poll().await.unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].bid.bidder(), a.address());
    }

    #[tokio::test]
    async fn rejects_in_order() {
        let s = setup().await;
        let a = Signer::random();

        // Wrong contract is reported before the missing deposit.
        let e = s
            .validator
            .submit_bid_at(bid(&a, Address::zero(), 1, 5), at(10))
            .await
            .unwrap_err();
        assert!(matches!(e, BidError::WrongAuctionContract(_)));

        let e = s.validator.submit_bid_at(bid(&a, s.auction, 1, 5), at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::NotDepositor(_)));
        assert_eq!(e.code(), "not-depositor");

        s.contract.deposit(a.address(), U256::from(3)).await.unwrap();
        let e = s.validator.submit_bid_at(bid(&a, s.auction, 1, 5), at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::InsufficientBalance { .. }));

        let e = s.validator.submit_bid_at(bid(&a, s.auction, 1, 1), at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::ReservePriceNotMet { .. }));

        let e = s.validator.submit_bid_at(bid(&a, s.auction, 2, 3), at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::BadRound { .. }));

        assert!(s.queue.consumer().poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let s = setup().await;
        let (a, b) = (Signer::random(), Signer::random());
        let mut json = serde_json::to_value(bid(&a, s.auction, 1, 5)).unwrap();
        json["bid"]["bidder"] = serde_json::to_value(b.address()).unwrap();
        let forged = serde_json::from_value(json).unwrap();
        let e = s.validator.submit_bid_at(forged, at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::InvalidSignature));
    }

    #[tokio::test]
    async fn late_bid_never_reaches_queue() {
        let s = setup().await;
        let a = Signer::random();
        s.contract.deposit(a.address(), U256::from(10)).await.unwrap();
        let e = s.validator.submit_bid_at(bid(&a, s.auction, 1, 5), at(45)).await.unwrap_err();
        assert!(matches!(e, BidError::AuctionClosed(r) if r == Round::from(1)));
        assert!(s.queue.rounds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fresh_deposit_counts_despite_cached_balance() {
        let s = setup().await;
        let cfg = ValidatorConfig::builder()
            .chain(ChainId::from(1))
            .auction(s.auction)
            .balance_ttl(Duration::from_secs(600))
            .build();
        let v = BidValidator::new(cfg, s.contract.clone(), s.queue.clone(), &metrics::NoMetrics)
            .await
            .unwrap();
        let a = Signer::random();

        let e = v.submit_bid_at(bid(&a, s.auction, 1, 5), at(10)).await.unwrap_err();
        assert!(matches!(e, BidError::NotDepositor(_)));

        s.contract.deposit(a.address(), U256::from(3)).await.unwrap();
        let e = v.submit_bid_at(bid(&a, s.auction, 1, 5), at(11)).await.unwrap_err();
        assert!(matches!(e, BidError::InsufficientBalance { balance, .. } if balance == U256::from(3)));

        s.contract.deposit(a.address(), U256::from(7)).await.unwrap();
        v.submit_bid_at(bid(&a, s.auction, 1, 5), at(12)).await.unwrap();
    }

    #[tokio::test]
    async fn limits_bids_per_round() {
        let s = setup().await;
        let a = Signer::random();
        s.contract.deposit(a.address(), U256::from(10)).await.unwrap();
        for n in 0..2 {
            s.validator.submit_bid_at(bid(&a, s.auction, 1, 3 + n), at(1)).await.unwrap();
        }
        let e = s.validator.submit_bid_at(bid(&a, s.auction, 1, 9), at(2)).await.unwrap_err();
        assert!(matches!(e, BidError::TooManyBids(_)));

        // The limit resets with the next auction.
        s.validator.submit_bid_at(bid(&a, s.auction, 2, 3), at(61)).await.unwrap();
    }
}
