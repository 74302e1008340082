use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use timeboost_types::{Address, ChainId};
use timeboost_utils::Backoff;

pub const DEFAULT_MAX_BIDS_PER_SENDER: usize = 5;

#[derive(Debug, Clone, Builder)]
pub struct ValidatorConfig {
    /// Chain the auction contract is deployed on.
    pub(crate) chain: ChainId,

    /// Address of the auction contract.
    pub(crate) auction: Address,

    /// Bids a single bidder may place per round.
    #[builder(default = DEFAULT_MAX_BIDS_PER_SENDER)]
    pub(crate) max_bids_per_sender: usize,

    /// How long a fetched deposit balance is reused.
    #[builder(default = Duration::from_secs(1))]
    pub(crate) balance_ttl: Duration,
}

#[derive(Debug, Clone, Builder)]
pub struct AuctioneerConfig {
    /// Delay after the closing boundary before a round is resolved.
    ///
    /// Bids accepted right before the boundary reach the queue within it.
    #[builder(default = Duration::from_secs(2))]
    pub(crate) resolution_wait: Duration,

    /// Interval at which the bid queue is polled for bids of other processes.
    #[builder(default = Duration::from_millis(250))]
    pub(crate) poll_interval: Duration,

    /// Retry delays of persisting and settling a resolution.
    #[builder(default)]
    pub(crate) backoff: Backoff,

    /// Directory of the leader lease shared by replicas.
    ///
    /// Without one this auctioneer always resolves rounds.
    pub(crate) lease_dir: Option<PathBuf>,

    /// Name of this replica in the lease.
    #[builder(into, default = format!("auctioneer-{}", std::process::id()))]
    pub(crate) instance: String,

    /// How long a lease claim stays valid without renewal.
    #[builder(default = Duration::from_secs(3))]
    pub(crate) lease_ttl: Duration,

    /// Directory where every consumed bid is archived.
    pub(crate) archive_dir: Option<PathBuf>,
}
