mod bidder;
mod express;
mod http;

use timeboost_auction::BidError;
use timeboost_contract::ContractError;
use timeboost_sequencer::GateError;

pub use bidder::{BidSubmitter, BidderClient};
pub use express::{ExpressLaneClient, ExpressLaneClientConfig, ExpressLaneTransport};
pub use http::HttpClient;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The remote side refused the request.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api status: {0}")]
    Status(reqwest::StatusCode),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("signing error: {0}")]
    Signing(#[from] alloy_signer::Error),

    #[error("timeout")]
    Timeout,
}

impl ClientError {
    /// The rejection code, if the request was refused.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            Self::Timeout => Some("timeout"),
            _ => None,
        }
    }

    fn rejected(code: &str, message: String) -> Self {
        if code == "timeout" {
            return Self::Timeout;
        }
        Self::Rejected {
            code: code.to_string(),
            message,
        }
    }
}

impl From<BidError> for ClientError {
    fn from(e: BidError) -> Self {
        Self::rejected(e.code(), e.to_string())
    }
}

impl From<GateError> for ClientError {
    fn from(e: GateError) -> Self {
        Self::rejected(e.code(), e.to_string())
    }
}
