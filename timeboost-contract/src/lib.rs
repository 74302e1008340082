//! Access to the express lane auction contract.
//!
//! [`AuctionContract`] is the interface the auction services and the
//! sequencer use. [`AlloyAuction`] talks to a deployed contract over
//! JSON-RPC, [`MemoryAuction`] keeps the contract state in process.

mod events;
mod memory;
mod provider;
mod sol_types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use timeboost_types::{
    Address, AuctionResolution, ChainId, InvalidTiming, Round, RoundTimingInfo, SignedBid, U256,
};

pub use memory::MemoryAuction;
pub use provider::AlloyAuction;
pub use sol_types::IExpressLaneAuction;

/// Settlement call for one round.
///
/// With a second bid the winner pays the second-highest amount, otherwise the
/// reserve price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub round: Round,
    pub first: SignedBid,
    pub second: Option<SignedBid>,
}

#[async_trait]
pub trait AuctionContract: Send + Sync + 'static {
    /// Address of the deployed auction contract.
    fn address(&self) -> Address;

    async fn chain_id(&self) -> Result<ChainId, ContractError>;

    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError>;

    async fn reserve_price(&self) -> Result<U256, ContractError>;

    /// Deposit balance of `account`.
    async fn balance_of(&self, account: Address) -> Result<U256, ContractError>;

    /// Add `amount` to the deposit of `account`.
    async fn deposit(&self, account: Address, amount: U256) -> Result<(), ContractError>;

    /// Submit the settlement transaction for a round.
    ///
    /// Fails with [`ContractError::AlreadyResolved`] if the round has been
    /// settled before.
    async fn resolve(&self, req: &ResolutionRequest) -> Result<(), ContractError>;

    /// The committed resolution of `round`, if any.
    async fn resolution(&self, round: Round) -> Result<Option<AuctionResolution>, ContractError>;

    /// All committed resolutions for rounds `>= round`, in round order.
    ///
    /// Implementations may forget resolutions of rounds before `round`.
    async fn resolutions_since(&self, round: Round)
    -> Result<Vec<AuctionResolution>, ContractError>;
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ContractError {
    #[error("round {0} has already been resolved")]
    AlreadyResolved(Round),

    #[error("contract rejected call: {0}")]
    Rejected(String),

    #[error("rpc error: {0}")]
    Transport(String),

    #[error("account {0} cannot be used to sign transactions")]
    NotOwner(Address),

    #[error("invalid round timing: {0}")]
    Timing(#[from] InvalidTiming),
}

impl ContractError {
    /// Is it worth retrying the call?
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
