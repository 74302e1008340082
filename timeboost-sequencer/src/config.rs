use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use timeboost_types::{Address, ChainId};

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateConfig {
    /// Chain envelopes must be bound to.
    pub(crate) chain: ChainId,

    /// Auction contract envelopes must be bound to.
    pub(crate) auction: Address,

    /// Delay of ordinary transactions while a round has a controller.
    #[builder(default = Duration::from_millis(200))]
    #[serde(with = "millis", default = "default_advantage")]
    pub(crate) advantage: Duration,

    /// How long an out-of-order envelope waits for the gap to fill.
    #[builder(default = Duration::from_secs(1))]
    #[serde(with = "millis", default = "default_buffer_timeout")]
    pub(crate) buffer_timeout: Duration,

    /// Maximum number of envelopes held per round.
    #[builder(default = 256)]
    #[serde(default = "default_max_buffered")]
    pub(crate) max_buffered: usize,

    /// How far ahead of the next expected sequence number an envelope may be.
    #[builder(default = 128)]
    #[serde(default = "default_max_future_distance")]
    pub(crate) max_future_distance: u64,

    /// How long before a round starts its envelopes are accepted.
    #[builder(default = Duration::from_secs(2))]
    #[serde(with = "millis", default = "default_early_submission_grace")]
    pub(crate) early_submission_grace: Duration,

    /// Maximum size of an inner transaction in bytes.
    #[builder(default = 128 * 1024)]
    #[serde(default = "default_max_tx_size")]
    pub(crate) max_tx_size: usize,

    /// Interval at which the auction contract is polled for resolutions.
    #[builder(default = Duration::from_secs(1))]
    #[serde(with = "millis", default = "default_poll_interval")]
    pub(crate) poll_interval: Duration,

    /// Interval at which released transactions are emitted.
    #[builder(default = Duration::from_millis(50))]
    #[serde(with = "millis", default = "default_tick")]
    pub(crate) tick: Duration,
}

impl GateConfig {
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn auction(&self) -> Address {
        self.auction
    }

    pub fn advantage(&self) -> Duration {
        self.advantage
    }
}

fn default_advantage() -> Duration {
    Duration::from_millis(200)
}

fn default_buffer_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_buffered() -> usize {
    256
}

fn default_max_future_distance() -> u64 {
    128
}

fn default_early_submission_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_max_tx_size() -> usize {
    128 * 1024
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_tick() -> Duration {
    Duration::from_millis(50)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
