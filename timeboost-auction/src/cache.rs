use std::collections::HashMap;

use timeboost_contract::ResolutionRequest;
use timeboost_types::{Address, AuctionResolution, Round, RoundOutcome, SignedBid, U256};

/// The standing bids of one round, one per bidder.
#[derive(Debug, Default)]
pub struct BidCache {
    bids: HashMap<Address, Standing>,
    arrivals: u64,
}

#[derive(Debug)]
struct Standing {
    bid: SignedBid,
    arrival: u64,
}

/// Effect of adding a bid to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    /// First bid of this bidder.
    New,
    /// Replaced a lower standing bid.
    Raised,
    /// Not higher than the standing bid.
    Ignored,
}

/// The outcome of a round together with the settlement call it requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        resolution: AuctionResolution,
        request: ResolutionRequest,
    },
    Unresolved(Round),
}

impl Resolution {
    pub fn outcome(&self) -> RoundOutcome {
        match self {
            Self::Resolved { resolution, .. } => RoundOutcome::Resolved(*resolution),
            Self::Unresolved(round) => RoundOutcome::Unresolved { round: *round },
        }
    }
}

impl BidCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    /// Add a bid, replacing the bidder's standing bid only if strictly higher.
    pub fn add(&mut self, bid: SignedBid) -> Added {
        let arrival = self.arrivals;
        self.arrivals += 1;
        match self.bids.get_mut(&bid.bidder()) {
            Some(s) if bid.amount() > s.bid.amount() => {
                *s = Standing { bid, arrival };
                Added::Raised
            }
            Some(_) => Added::Ignored,
            None => {
                self.bids.insert(bid.bidder(), Standing { bid, arrival });
                Added::New
            }
        }
    }

    /// The standing bid of a bidder.
    pub fn get(&self, bidder: &Address) -> Option<&SignedBid> {
        self.bids.get(bidder).map(|s| &s.bid)
    }

    /// Highest and second-highest bids, ties going to the earlier arrival.
    pub fn top_two(&self) -> (Option<&SignedBid>, Option<&SignedBid>) {
        let mut first: Option<&Standing> = None;
        let mut second: Option<&Standing> = None;
        for s in self.bids.values() {
            if first.is_none_or(|f| outranks(s, f)) {
                second = first;
                first = Some(s)
            } else if second.is_none_or(|x| outranks(s, x)) {
                second = Some(s)
            }
        }
        (first.map(|s| &s.bid), second.map(|s| &s.bid))
    }

    /// Resolve the round by the second-price rule.
    ///
    /// A single bid pays the reserve price (capped by its own amount).
    pub fn resolve(&self, round: Round, reserve: U256) -> Resolution {
        match self.top_two() {
            (None, _) => Resolution::Unresolved(round),
            (Some(first), second) => {
                let price = match second {
                    Some(b) => b.amount().min(first.amount()),
                    None => reserve.min(first.amount()),
                };
                Resolution::Resolved {
                    resolution: AuctionResolution {
                        round,
                        winner: first.bidder(),
                        controller: first.controller(),
                        first_price: first.amount(),
                        second_price: price,
                    },
                    request: ResolutionRequest {
                        round,
                        first: first.clone(),
                        second: second.cloned(),
                    },
                }
            }
        }
    }
}

fn outranks(a: &Standing, b: &Standing) -> bool {
    (a.bid.amount(), std::cmp::Reverse(a.arrival)) > (b.bid.amount(), std::cmp::Reverse(b.arrival))
}
