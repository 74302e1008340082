use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{Address, Round};

/// The result of a resolved auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuctionResolution {
    pub round: Round,
    /// The winning bidder.
    pub winner: Address,
    /// The address holding the express lane for the round.
    pub controller: Address,
    /// The winning bid amount.
    pub first_price: U256,
    /// The amount the winner pays.
    pub second_price: U256,
}

/// Outcome of a round's auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum RoundOutcome {
    /// The round has an express-lane controller.
    Resolved(AuctionResolution),
    /// No bids were received; the round has no controller.
    Unresolved { round: Round },
}

impl RoundOutcome {
    pub fn round(&self) -> Round {
        match self {
            Self::Resolved(r) => r.round,
            Self::Unresolved { round } => *round,
        }
    }

    pub fn controller(&self) -> Option<Address> {
        match self {
            Self::Resolved(r) => Some(r.controller),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn resolution(&self) -> Option<&AuctionResolution> {
        match self {
            Self::Resolved(r) => Some(r),
            Self::Unresolved { .. } => None,
        }
    }
}

impl From<AuctionResolution> for RoundOutcome {
    fn from(r: AuctionResolution) -> Self {
        Self::Resolved(r)
    }
}
