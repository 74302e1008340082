use serde::{Deserialize, Serialize};
use timeboost_types::{Address, ChainId};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    pub id: ChainId,
    pub rpc_url: Url,
    pub auction_contract: Address,

    /// Block to start scanning for auction events from.
    #[serde(default)]
    pub from_block: u64,
}
