use std::{iter::repeat, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};

pub const NUM_DELAYS: usize = 5;

/// Delays between successive attempts of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Backoff {
    /// The sequence of delay multipliers.
    ///
    /// The last value is repeated forever.
    #[builder(default = [1, 3, 5, 10, 15])]
    pub delays: [u8; NUM_DELAYS],

    /// The unit each multiplier is applied to.
    #[builder(default = Duration::from_secs(1))]
    #[serde(with = "millis")]
    pub unit: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Backoff {
    pub fn delay_iter(&self) -> impl Iterator<Item = Duration> + use<> {
        let unit = self.unit;
        self.delays
            .into_iter()
            .chain(repeat(self.delays[NUM_DELAYS - 1]))
            .map(move |n| unit * u32::from(n))
    }
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quickcheck::quickcheck;

    use super::Backoff;

    #[test]
    fn default_delays() {
        let d: Vec<u64> = Backoff::default()
            .delay_iter()
            .take(7)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(d, [1, 3, 5, 10, 15, 15, 15])
    }

    quickcheck! {
        fn last_delay_repeats(unit: u16, n: u8) -> bool {
            let b = Backoff::builder().unit(Duration::from_millis(unit.into())).build();
            let last = b.delay_iter().nth(4 + usize::from(n));
            last == Some(Duration::from_millis(u64::from(unit) * 15))
        }
    }
}
