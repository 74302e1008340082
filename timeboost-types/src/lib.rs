mod address;
mod auction;
mod bid;
mod seqno;
mod submission;
mod time;
mod timing;

pub mod rpc;

pub use address::{Address, ChainId, Signature, Signer};
pub use alloy_primitives::{Bytes, U256};
pub use auction::{AuctionResolution, RoundOutcome};
pub use bid::{Bid, EIP712_NAME, EIP712_VERSION, SignedBid};
pub use seqno::SeqNo;
pub use submission::{ExpressLaneSubmission, SignedSubmission};
pub use time::{Round, Timestamp};
pub use timing::{InvalidTiming, RoundTimingInfo};
