//! Bid validation and auction resolution for the express lane.

mod archive;
mod auctioneer;
mod balance;
mod cache;
mod config;
mod lease;
mod metrics;
mod queue;
mod settle;
mod store;
mod validator;

pub use archive::{ArchiveError, BidArchive};
pub use auctioneer::{AuctioneerError, AuctioneerServer};
pub use cache::{Added, BidCache, Resolution};
pub use config::{AuctioneerConfig, DEFAULT_MAX_BIDS_PER_SENDER, ValidatorConfig};
pub use lease::{Holder, Lease, LeaseError};
pub use metrics::{AuctioneerMetrics, ValidatorMetrics};
pub use queue::{BidConsumer, BidQueue, QueueError, QueuedBid};
pub use settle::{Settlement, Settler};
pub use store::{ResolutionStore, RoundRecord, Status, StoreError};
pub use validator::{BidError, BidValidator};
