//! Event monitoring for the auction contract.

use std::collections::BTreeMap;

use alloy::{
    primitives::Address,
    providers::{DynProvider, Provider},
    rpc::types::{BlockNumberOrTag, Filter},
    sol_types::SolEvent,
};
use timeboost_types::{AuctionResolution, Round};
use tracing::{debug, warn};

use crate::{ContractError, IExpressLaneAuction::AuctionResolved};

/// Incrementally scans `AuctionResolved` logs and caches the results.
#[derive(Debug)]
pub(crate) struct ResolutionScanner {
    contract: Address,
    next_block: u64,
    resolved: BTreeMap<Round, AuctionResolution>,
}

impl ResolutionScanner {
    pub(crate) fn new(contract: Address, from_block: u64) -> Self {
        Self {
            contract,
            next_block: from_block,
            resolved: BTreeMap::new(),
        }
    }

    pub(crate) async fn scan(&mut self, provider: &DynProvider) -> Result<(), ContractError> {
        let latest = provider
            .get_block_number()
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?;
        if latest < self.next_block {
            return Ok(());
        }
        let filter = Filter::new()
            .address(self.contract)
            .from_block(BlockNumberOrTag::Number(self.next_block))
            .to_block(BlockNumberOrTag::Number(latest))
            .event(AuctionResolved::SIGNATURE);

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| ContractError::Transport(e.to_string()))?;

        for log in logs {
            match AuctionResolved::decode_log(&log.into()) {
                Ok(ev) => {
                    let r = resolution(&ev.data);
                    debug!(round = %r.round, controller = %r.controller, "auction resolved event");
                    self.resolved.insert(r.round, r);
                }
                Err(err) => warn!(%err, "failed to decode `AuctionResolved` log"),
            }
        }
        self.next_block = latest + 1;
        Ok(())
    }

    pub(crate) fn get(&self, r: Round) -> Option<AuctionResolution> {
        self.resolved.get(&r).copied()
    }

    /// Resolutions of rounds `>= r`. Older rounds are forgotten.
    pub(crate) fn since(&mut self, r: Round) -> Vec<AuctionResolution> {
        self.resolved = self.resolved.split_off(&r);
        self.resolved.values().copied().collect()
    }
}

fn resolution(ev: &AuctionResolved) -> AuctionResolution {
    AuctionResolution {
        round: Round::from(ev.round),
        winner: ev.firstPriceBidder.into(),
        controller: ev.firstPriceExpressLaneController.into(),
        first_price: ev.firstPriceAmount,
        second_price: ev.price,
    }
}
