use metrics::{Counter, Gauge, Metrics, NoMetrics};

#[derive(Debug)]
#[non_exhaustive]
pub struct ValidatorMetrics {
    pub accepted: Box<dyn Counter>,
    pub rejected: Box<dyn Counter>,
    pub auction_round: Box<dyn Gauge>,
}

impl Default for ValidatorMetrics {
    fn default() -> Self {
        Self::new(&NoMetrics)
    }
}

impl ValidatorMetrics {
    pub fn new<M: Metrics>(m: &M) -> Self {
        Self {
            accepted: m.create_counter("bids_accepted", None),
            rejected: m.create_counter("bids_rejected", None),
            auction_round: m.create_gauge("validator_auction_round", None),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub struct AuctioneerMetrics {
    pub open_rounds: Box<dyn Gauge>,
    pub bids: Box<dyn Counter>,
    pub resolved: Box<dyn Counter>,
    pub unresolved: Box<dyn Counter>,
    pub committed: Box<dyn Counter>,
    pub reconciled: Box<dyn Counter>,
    pub abandoned: Box<dyn Counter>,
    pub settling: Box<dyn Gauge>,
    pub primary: Box<dyn Gauge>,
}

impl Default for AuctioneerMetrics {
    fn default() -> Self {
        Self::new(&NoMetrics)
    }
}

impl AuctioneerMetrics {
    pub fn new<M: Metrics>(m: &M) -> Self {
        Self {
            open_rounds: m.create_gauge("auction_open_rounds", None),
            bids: m.create_counter("auction_bids_consumed", None),
            resolved: m.create_counter("auction_rounds_resolved", None),
            unresolved: m.create_counter("auction_rounds_unresolved", None),
            committed: m.create_counter("settlements_committed", None),
            reconciled: m.create_counter("settlements_reconciled", None),
            abandoned: m.create_counter("settlements_abandoned", None),
            settling: m.create_gauge("settlements_in_flight", None),
            primary: m.create_gauge("auctioneer_primary", None),
        }
    }
}
