use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use timeboost_types::{
    Address, AuctionResolution, ChainId, Round, RoundTimingInfo, SignedBid, U256,
};
use tracing::debug;

use crate::{AuctionContract, ContractError, ResolutionRequest};

/// An in-process auction contract.
///
/// Mirrors the checks the deployed contract applies on settlement and can be
/// told to fail calls for testing retries.
#[derive(Debug, Clone)]
pub struct MemoryAuction {
    address: Address,
    chain: ChainId,
    timing: RoundTimingInfo,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    reserve: U256,
    balances: HashMap<Address, U256>,
    resolved: BTreeMap<Round, AuctionResolution>,
    resolve_calls: usize,
    fail_next: usize,
}

impl MemoryAuction {
    pub fn new(chain: ChainId, address: Address, timing: RoundTimingInfo) -> Self {
        Self {
            address,
            chain,
            timing,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn with_reserve_price(self, p: U256) -> Self {
        self.set_reserve_price(p);
        self
    }

    pub fn set_reserve_price(&self, p: U256) {
        self.inner.lock().reserve = p
    }

    /// Let the next `n` calls fail with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n
    }

    /// Number of settlement transactions received, failed ones included.
    pub fn resolve_calls(&self) -> usize {
        self.inner.lock().resolve_calls
    }

    /// Commit a resolution as if another party had settled the round.
    pub fn record_resolution(&self, r: AuctionResolution) {
        self.inner.lock().resolved.insert(r.round, r);
    }

    fn check_bid(&self, round: Round, b: &SignedBid) -> Result<(), ContractError> {
        if b.round() != round {
            return Err(ContractError::Rejected(format!(
                "bid for round {} used to resolve round {round}",
                b.round()
            )));
        }
        if b.auction() != self.address || b.chain_id() != self.chain {
            return Err(ContractError::Rejected("bid for another deployment".into()));
        }
        if !b.is_signed_by_bidder() {
            return Err(ContractError::Rejected("invalid bid signature".into()));
        }
        Ok(())
    }
}

impl Inner {
    fn check_available(&mut self) -> Result<(), ContractError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ContractError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuctionContract for MemoryAuction {
    fn address(&self) -> Address {
        self.address
    }

    async fn chain_id(&self) -> Result<ChainId, ContractError> {
        Ok(self.chain)
    }

    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError> {
        Ok(self.timing)
    }

    async fn reserve_price(&self) -> Result<U256, ContractError> {
        Ok(self.inner.lock().reserve)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, ContractError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        Ok(inner.balances.get(&account).copied().unwrap_or_default())
    }

    async fn deposit(&self, account: Address, amount: U256) -> Result<(), ContractError> {
        if amount.is_zero() {
            return Err(ContractError::Rejected("zero deposit".into()));
        }
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let b = inner.balances.entry(account).or_default();
        *b = b.saturating_add(amount);
        debug!(%account, %amount, balance = %b, "deposit");
        Ok(())
    }

    async fn resolve(&self, req: &ResolutionRequest) -> Result<(), ContractError> {
        self.check_bid(req.round, &req.first)?;
        if let Some(second) = &req.second {
            self.check_bid(req.round, second)?;
            if second.amount() > req.first.amount() {
                return Err(ContractError::Rejected("bids out of order".into()));
            }
        }
        let mut inner = self.inner.lock();
        inner.resolve_calls += 1;
        inner.check_available()?;
        if inner.resolved.contains_key(&req.round) {
            return Err(ContractError::AlreadyResolved(req.round));
        }
        let price = match &req.second {
            Some(b) => b.amount(),
            None => inner.reserve.min(req.first.amount()),
        };
        let winner = req.first.bidder();
        let balance = inner.balances.entry(winner).or_default();
        if *balance < price {
            return Err(ContractError::Rejected(format!(
                "winner {winner} cannot pay {price}"
            )));
        }
        *balance -= price;
        let resolution = AuctionResolution {
            round: req.round,
            winner,
            controller: req.first.controller(),
            first_price: req.first.amount(),
            second_price: price,
        };
        inner.resolved.insert(req.round, resolution);
        debug!(round = %req.round, %winner, %price, "round resolved");
        Ok(())
    }

    async fn resolution(&self, round: Round) -> Result<Option<AuctionResolution>, ContractError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        Ok(inner.resolved.get(&round).copied())
    }

    async fn resolutions_since(
        &self,
        round: Round,
    ) -> Result<Vec<AuctionResolution>, ContractError> {
        let inner = self.inner.lock();
        Ok(inner.resolved.range(round..).map(|(_, r)| *r).collect())
    }
}
