use alloy_primitives::Bytes;
use committable::{Commitment, Committable, RawCommitmentBuilder};
use serde::{Deserialize, Serialize};

use crate::{Address, ChainId, Round, SeqNo, Signature, Signer};

const DOMAIN: &str = "TIMEBOOST_BID";

/// An express-lane envelope before signing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExpressLaneSubmission {
    chain: ChainId,
    auction: Address,
    round: Round,
    seqno: SeqNo,
    transaction: Bytes,
}

impl ExpressLaneSubmission {
    pub fn new(chain: ChainId, auction: Address, round: Round, seqno: SeqNo, tx: Bytes) -> Self {
        Self {
            chain,
            auction,
            round,
            seqno,
            transaction: tx,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain
    }

    pub fn auction(&self) -> Address {
        self.auction
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn seqno(&self) -> SeqNo {
        self.seqno
    }

    pub fn transaction(&self) -> &Bytes {
        &self.transaction
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(DOMAIN.as_bytes());
        buf.extend_from_slice(&u64::from(self.chain).to_be_bytes());
        buf.extend_from_slice(self.auction.as_slice());
        buf.extend_from_slice(&self.round.to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&self.transaction);
        buf
    }

    pub fn sign(self, signer: &Signer) -> Result<SignedSubmission, alloy_signer::Error> {
        let signature = signer.sign_message(&self.to_bytes())?;
        Ok(SignedSubmission {
            submission: self,
            signature,
        })
    }
}

/// A signed express-lane envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedSubmission {
    submission: ExpressLaneSubmission,
    signature: Signature,
}

impl std::ops::Deref for SignedSubmission {
    type Target = ExpressLaneSubmission;

    fn deref(&self) -> &Self::Target {
        &self.submission
    }
}

impl SignedSubmission {
    pub fn submission(&self) -> &ExpressLaneSubmission {
        &self.submission
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Attempts to extract the sender's address from the signature.
    pub fn sender(&self) -> Result<Address, alloy_primitives::SignatureError> {
        self.signature.recover_from_msg(&self.submission.to_bytes())
    }

    pub fn digest(&self) -> [u8; 32] {
        self.commit().into()
    }
}

impl Committable for SignedSubmission {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("SignedSubmission")
            .field("chain", self.submission.chain.commit())
            .field("auction", self.submission.auction.commit())
            .field("round", self.submission.round.commit())
            .field("seqno", self.submission.seqno.commit())
            .var_size_field("transaction", &self.submission.transaction)
            .field("signature", self.signature.commit())
            .finalize()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;

    use super::ExpressLaneSubmission;
    use crate::{Address, ChainId, Round, SeqNo, Signer};

    #[test]
    fn sender_is_signer() {
        let s = Signer::random();
        let e = ExpressLaneSubmission::new(
            ChainId::from(1),
            Address::zero(),
            Round::from(3),
            SeqNo::from(0),
            Bytes::from_static(b"tx"),
        )
        .sign(&s)
        .unwrap();
        assert_eq!(e.sender().unwrap(), s.address());

        let json = serde_json::to_string(&e).unwrap();
        let back: super::SignedSubmission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
        assert_eq!(back.digest(), e.digest());
    }
}
