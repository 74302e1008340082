use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use timeboost_auction::{AuctioneerConfig, ValidatorConfig};
use timeboost_sequencer::GateConfig;
use timeboost_utils::Backoff;

use crate::{ChainConfig, ConfigError, read_toml};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    pub address: SocketAddr,
}

/// Configuration of a node running bid validation and/or the auctioneer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuctionNodeConfig {
    pub chain: ChainConfig,
    pub http: HttpConfig,

    /// Directory holding the bid queue, the resolution store, the bid
    /// archive and the leader lease of auctioneer replicas.
    pub data_dir: PathBuf,

    #[serde(default)]
    pub validator: ValidatorSection,

    #[serde(default)]
    pub auctioneer: AuctioneerSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidatorSection {
    pub max_bids_per_sender: Option<usize>,
    pub balance_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuctioneerSection {
    pub resolution_wait_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub backoff: Option<Backoff>,
    /// Name of this replica in the leader lease.
    pub instance: Option<String>,
    pub lease_ttl_ms: Option<u64>,
}

impl AuctionNodeConfig {
    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_toml(path).await
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("bids")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("resolutions")
    }

    pub fn lease_dir(&self) -> PathBuf {
        self.data_dir.join("lease")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::builder()
            .chain(self.chain.id)
            .auction(self.chain.auction_contract)
            .maybe_max_bids_per_sender(self.validator.max_bids_per_sender)
            .maybe_balance_ttl(self.validator.balance_ttl_ms.map(Duration::from_millis))
            .build()
    }

    pub fn auctioneer_config(&self) -> AuctioneerConfig {
        let ms = |v: Option<u64>| v.map(Duration::from_millis);
        AuctioneerConfig::builder()
            .maybe_resolution_wait(ms(self.auctioneer.resolution_wait_ms))
            .maybe_poll_interval(ms(self.auctioneer.poll_interval_ms))
            .maybe_backoff(self.auctioneer.backoff)
            .lease_dir(self.lease_dir())
            .maybe_instance(self.auctioneer.instance.clone())
            .maybe_lease_ttl(ms(self.auctioneer.lease_ttl_ms))
            .archive_dir(self.archive_dir())
            .build()
    }
}

/// Configuration of a sequencer's express lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SequencerNodeConfig {
    pub chain: ChainConfig,
    pub http: HttpConfig,

    #[serde(default)]
    pub gate: GateSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateSection {
    pub advantage_ms: Option<u64>,
    pub buffer_timeout_ms: Option<u64>,
    pub max_buffered: Option<usize>,
    pub max_future_distance: Option<u64>,
    pub early_submission_grace_ms: Option<u64>,
    pub max_tx_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub tick_ms: Option<u64>,
}

impl SequencerNodeConfig {
    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        read_toml(path).await
    }

    pub fn gate_config(&self) -> GateConfig {
        let ms = |v: Option<u64>| v.map(Duration::from_millis);
        GateConfig::builder()
            .chain(self.chain.id)
            .auction(self.chain.auction_contract)
            .maybe_advantage(ms(self.gate.advantage_ms))
            .maybe_buffer_timeout(ms(self.gate.buffer_timeout_ms))
            .maybe_max_buffered(self.gate.max_buffered)
            .maybe_max_future_distance(self.gate.max_future_distance)
            .maybe_early_submission_grace(ms(self.gate.early_submission_grace_ms))
            .maybe_max_tx_size(self.gate.max_tx_size)
            .maybe_poll_interval(ms(self.gate.poll_interval_ms))
            .maybe_tick(ms(self.gate.tick_ms))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use timeboost_types::ChainId;

    use super::{AuctionNodeConfig, SequencerNodeConfig};

    const AUCTION: &str = r#"
data-dir = "/var/lib/auction"

[chain]
id = 412346
rpc-url = "http://127.0.0.1:8547/"
auction-contract = "0x2c30d6d6b0e5f9c2b2a3f1e4d5c6b7a8f9e0d1c2"

[http]
address = "127.0.0.1:8800"

[validator]
max-bids-per-sender = 3

[auctioneer]
resolution-wait-ms = 1500
instance = "auctioneer-a"
backoff = { delays = [1, 1, 2, 3, 5], unit = 100 }
"#;

    const SEQUENCER: &str = r#"
[chain]
id = 412346
rpc-url = "http://127.0.0.1:8547/"
auction-contract = "0x2c30d6d6b0e5f9c2b2a3f1e4d5c6b7a8f9e0d1c2"
from-block = 12

[http]
address = "127.0.0.1:8900"

[gate]
advantage-ms = 250
"#;

    #[test]
    fn auction_node() {
        let c: AuctionNodeConfig = toml::from_str(AUCTION).unwrap();
        assert_eq!(c.chain.id, ChainId::from(412346));
        assert_eq!(c.chain.from_block, 0);
        assert_eq!(c.validator.max_bids_per_sender, Some(3));
        assert_eq!(c.queue_dir(), Path::new("/var/lib/auction/bids"));
        assert_eq!(c.store_dir(), Path::new("/var/lib/auction/resolutions"));
        let b = c.auctioneer.backoff.unwrap();
        assert_eq!(b.unit, Duration::from_millis(100));
        assert_eq!(b.delays, [1, 1, 2, 3, 5]);
        assert_eq!(c.auctioneer.instance.as_deref(), Some("auctioneer-a"));
        assert_eq!(c.lease_dir(), Path::new("/var/lib/auction/lease"));
        assert_eq!(c.archive_dir(), Path::new("/var/lib/auction/archive"));
    }

    #[test]
    fn sequencer_node() {
        let c: SequencerNodeConfig = toml::from_str(SEQUENCER).unwrap();
        assert_eq!(c.chain.from_block, 12);
        let g = c.gate_config();
        assert_eq!(g.advantage(), Duration::from_millis(250));
        assert_eq!(g.auction(), c.chain.auction_contract);
        assert_eq!(g.chain(), ChainId::from(412346));
    }

    #[tokio::test]
    async fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequencer.toml");
        tokio::fs::write(&path, SEQUENCER).await.unwrap();
        let c = SequencerNodeConfig::read(&path).await.unwrap();
        assert_eq!(c.gate.advantage_ms, Some(250));

        // The sequencer file lacks the auction node's data directory.
        let err = AuctionNodeConfig::read(&path).await.unwrap_err();
        assert!(err.to_string().contains("sequencer.toml"));
    }
}
