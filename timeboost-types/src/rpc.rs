//! Request and response bodies of the bid and express-lane HTTP APIs.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{Address, Round, SeqNo, SignedSubmission, Timestamp};

/// Error body returned with every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable, machine readable rejection code.
    pub code: String,
    pub message: String,
}

/// Returned when a bid has been accepted into the bid queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidReceipt {
    pub round: Round,
    pub bidder: Address,
    pub amount: U256,
}

/// What the gate did with an envelope it did not reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckStatus {
    /// Released into the priority path.
    Admitted,
    /// Held until preceding sequence numbers arrive.
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub round: Round,
    pub seqno: SeqNo,
    pub status: AckStatus,
}

/// Reported by the synchronous express-lane endpoint once the inner
/// transaction has been handed to the block-building pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    pub round: Round,
    /// Position in the sequencer's output stream.
    pub position: u64,
    pub time: Timestamp,
    /// Whether the transaction was ordered through the express lane.
    pub boosted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSubmission {
    pub envelope: SignedSubmission,
    pub timeout_ms: u64,
}

/// Current state of the express lane as seen by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStatus {
    pub version: u64,
    pub round: Round,
    pub controller: Option<Address>,
}
