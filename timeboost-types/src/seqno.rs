use std::ops::{Add, Deref};

use committable::{Commitment, Committable, RawCommitmentBuilder};
use serde::{Deserialize, Serialize};

/// Express-lane sequence number, counted per round from zero.
#[derive(
    Debug, Clone, Default, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SeqNo(u64);

impl SeqNo {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Number of sequence numbers from `self` up to `other`, zero if `other` is lower.
    pub fn distance(self, other: SeqNo) -> u64 {
        other.0.saturating_sub(self.0)
    }
}

impl Add<u64> for SeqNo {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::fmt::Display for SeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeqNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SeqNo> for u64 {
    fn from(value: SeqNo) -> Self {
        value.0
    }
}

impl Deref for SeqNo {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Committable for SeqNo {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("SeqNo").u64(self.0).finalize()
    }
}
