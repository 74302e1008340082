use alloy_primitives::{B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use committable::{Commitment, Committable, RawCommitmentBuilder};
use serde::{Deserialize, Serialize};

use crate::{Address, ChainId, Round, Signature, Signer};

mod sol {
    alloy_sol_types::sol! {
        struct Bid {
            uint64 round;
            address expressLaneController;
            uint256 amount;
        }
    }
}

/// EIP-712 domain name of the auction contract.
pub const EIP712_NAME: &str = "ExpressLaneAuction";

/// EIP-712 domain version of the auction contract.
pub const EIP712_VERSION: &str = "1";

/// An unsigned bid for the express lane of one round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Bid {
    chain: ChainId,
    auction: Address,
    bidder: Address,
    controller: Address,
    round: Round,
    amount: U256,
}

impl Bid {
    /// Create a bid where the bidder also acts as express-lane controller.
    pub fn new(chain: ChainId, auction: Address, bidder: Address, round: Round, amount: U256) -> Self {
        Self {
            chain,
            auction,
            bidder,
            controller: bidder,
            round,
            amount,
        }
    }

    /// Designate a different address as express-lane controller.
    pub fn with_controller(mut self, c: Address) -> Self {
        self.controller = c;
        self
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain
    }

    pub fn auction(&self) -> Address {
        self.auction
    }

    pub fn bidder(&self) -> Address {
        self.bidder
    }

    pub fn controller(&self) -> Address {
        self.controller
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn domain(&self) -> Eip712Domain {
        eip712_domain! {
            name: EIP712_NAME,
            version: EIP712_VERSION,
            chain_id: u64::from(self.chain),
            verifying_contract: *self.auction,
        }
    }

    /// The EIP-712 hash the bidder signs.
    pub fn signing_hash(&self) -> B256 {
        let msg = sol::Bid {
            round: self.round.into(),
            expressLaneController: *self.controller,
            amount: self.amount,
        };
        msg.eip712_signing_hash(&self.domain())
    }

    /// Sign the bid.
    ///
    /// The bidder address is taken from the signer.
    pub fn sign(mut self, signer: &Signer) -> Result<SignedBid, alloy_signer::Error> {
        if self.bidder != signer.address() {
            if self.controller == self.bidder {
                self.controller = signer.address()
            }
            self.bidder = signer.address()
        }
        let signature = signer.sign_hash(&self.signing_hash())?;
        Ok(SignedBid {
            bid: self,
            signature,
        })
    }
}

/// A bid with the bidder's signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedBid {
    bid: Bid,
    signature: Signature,
}

impl std::ops::Deref for SignedBid {
    type Target = Bid;

    fn deref(&self) -> &Self::Target {
        &self.bid
    }
}

impl SignedBid {
    pub fn bid(&self) -> &Bid {
        &self.bid
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The address the signature recovers to.
    pub fn recover(&self) -> Result<Address, alloy_primitives::SignatureError> {
        self.signature.recover_from_hash(&self.bid.signing_hash())
    }

    /// Does the signature recover to the claimed bidder?
    pub fn is_signed_by_bidder(&self) -> bool {
        self.recover().map(|a| a == self.bid.bidder).unwrap_or(false)
    }

    pub fn digest(&self) -> [u8; 32] {
        self.commit().into()
    }
}

impl Committable for SignedBid {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("SignedBid")
            .field("chain", self.bid.chain.commit())
            .field("auction", self.bid.auction.commit())
            .field("bidder", self.bid.bidder.commit())
            .field("controller", self.bid.controller.commit())
            .field("round", self.bid.round.commit())
            .fixed_size_field("amount", &self.bid.amount.to_be_bytes::<32>())
            .field("signature", self.signature.commit())
            .finalize()
    }
}
