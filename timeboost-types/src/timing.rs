use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Round, Timestamp};

/// Round timing parameters of the auction contract.
///
/// Rounds are contiguous, zero-based windows of `round` length starting at
/// `offset`. The last `closing` of a round is the auction-closing window for
/// the round that follows it, and the `reserve` before that is the window in
/// which the reserve price may still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimingParams", into = "TimingParams")]
pub struct RoundTimingInfo {
    offset: Timestamp,
    round: Duration,
    closing: Duration,
    reserve: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidTiming {
    #[error("round duration must be non-zero")]
    ZeroRoundDuration,

    #[error("auction closing ({closing:?}) plus reserve submission ({reserve:?}) exceed round duration ({round:?})")]
    WindowsExceedRound {
        round: Duration,
        closing: Duration,
        reserve: Duration,
    },

    #[error("resolution wait time {wait:?} must be shorter than the closing window {closing:?}")]
    ResolutionWaitTooLong { wait: Duration, closing: Duration },
}

impl RoundTimingInfo {
    pub fn new(
        offset: Timestamp,
        round: Duration,
        closing: Duration,
        reserve: Duration,
    ) -> Result<Self, InvalidTiming> {
        if round.as_millis() == 0 {
            return Err(InvalidTiming::ZeroRoundDuration);
        }
        if closing + reserve > round {
            return Err(InvalidTiming::WindowsExceedRound {
                round,
                closing,
                reserve,
            });
        }
        Ok(Self {
            offset,
            round,
            closing,
            reserve,
        })
    }

    pub fn offset(&self) -> Timestamp {
        self.offset
    }

    pub fn round_duration(&self) -> Duration {
        self.round
    }

    pub fn closing_duration(&self) -> Duration {
        self.closing
    }

    pub fn reserve_submission_duration(&self) -> Duration {
        self.reserve
    }

    fn round_millis(&self) -> u64 {
        self.round.as_millis() as u64
    }

    /// The round containing `t`.
    ///
    /// Times before the offset belong to round 0.
    pub fn round_of(&self, t: Timestamp) -> Round {
        let since = t.as_millis().saturating_sub(self.offset.as_millis());
        Round::from(since / self.round_millis())
    }

    pub fn current_round(&self) -> Round {
        self.round_of(Timestamp::now())
    }

    /// The round whose auction is open (or closing) at `t`.
    pub fn auction_round(&self, t: Timestamp) -> Round {
        self.round_of(t).next()
    }

    /// Start time of round `r`.
    pub fn round_start(&self, r: Round) -> Timestamp {
        Timestamp::from_millis(
            self.offset
                .as_millis()
                .saturating_add(u64::from(r).saturating_mul(self.round_millis())),
        )
    }

    pub fn time_til_next_round(&self, t: Timestamp) -> Duration {
        let next = self.round_start(self.round_of(t).next());
        next.saturating_duration_since(t.max(self.offset))
    }

    /// Is `t` within the last `closing` duration of its round?
    pub fn is_in_auction_closing_window(&self, t: Timestamp) -> bool {
        self.time_til_next_round(t) <= self.closing
    }

    /// Has the reserve price of the auction open at `t` been locked?
    pub fn is_reserve_price_locked(&self, t: Timestamp) -> bool {
        self.time_til_next_round(t) <= self.closing + self.reserve
    }

    /// The instant at which bidding for round `r` closes.
    pub fn auction_closing_time(&self, r: Round) -> Timestamp {
        self.round_start(r) - self.closing
    }

    /// Has the auction for round `r` closed at time `t`?
    pub fn is_auction_closed(&self, r: Round, t: Timestamp) -> bool {
        t >= self.auction_closing_time(r)
    }

    pub fn validate_resolution_wait(&self, wait: Duration) -> Result<(), InvalidTiming> {
        if wait >= self.closing {
            return Err(InvalidTiming::ResolutionWaitTooLong {
                wait,
                closing: self.closing,
            });
        }
        Ok(())
    }
}

/// Serialized form, durations in milliseconds.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TimingParams {
    offset: Timestamp,
    round_ms: u64,
    closing_ms: u64,
    reserve_ms: u64,
}

impl TryFrom<TimingParams> for RoundTimingInfo {
    type Error = InvalidTiming;

    fn try_from(p: TimingParams) -> Result<Self, Self::Error> {
        Self::new(
            p.offset,
            Duration::from_millis(p.round_ms),
            Duration::from_millis(p.closing_ms),
            Duration::from_millis(p.reserve_ms),
        )
    }
}

impl From<RoundTimingInfo> for TimingParams {
    fn from(t: RoundTimingInfo) -> Self {
        Self {
            offset: t.offset,
            round_ms: t.round.as_millis() as u64,
            closing_ms: t.closing.as_millis() as u64,
            reserve_ms: t.reserve.as_millis() as u64,
        }
    }
}
