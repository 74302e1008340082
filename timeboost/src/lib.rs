pub mod api;

pub use timeboost_auction as auction;
pub use timeboost_client as client;
pub use timeboost_config as config;
pub use timeboost_contract as contract;
pub use timeboost_sequencer as sequencer;
pub use timeboost_types as types;
