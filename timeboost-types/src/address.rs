use std::str::FromStr;

use alloy_primitives::{B256, SignatureError};
use alloy_signer::SignerSync;
use alloy_signer_local::{LocalSignerError, PrivateKeySigner};
use committable::{Commitment, Committable, RawCommitmentBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Address wrapper
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct Address(alloy_primitives::Address);

impl Address {
    pub fn zero() -> Self {
        Self(alloy_primitives::Address::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::ops::Deref for Address {
    type Target = alloy_primitives::Address;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = <alloy_primitives::Address as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<alloy_primitives::Address> for Address {
    fn from(address: alloy_primitives::Address) -> Self {
        Address(address)
    }
}

impl From<Address> for alloy_primitives::Address {
    fn from(eth_address: Address) -> Self {
        eth_address.0
    }
}

impl Committable for Address {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("Address")
            .fixed_size_bytes(&self.0.0)
            .finalize()
    }
}

// Signature wrapper, serialized as 65 hex-encoded bytes (r, s, v).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(alloy_primitives::Signature);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        self.0.as_bytes()
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self, SignatureError> {
        alloy_primitives::Signature::from_raw(b).map(Self)
    }

    /// Recover the signer of an EIP-191 personal message.
    pub fn recover_from_msg(&self, msg: &[u8]) -> Result<Address, SignatureError> {
        self.0.recover_address_from_msg(msg).map(Address)
    }

    /// Recover the signer of a prehashed message.
    pub fn recover_from_hash(&self, hash: &B256) -> Result<Address, SignatureError> {
        self.0.recover_address_from_prehash(hash).map(Address)
    }
}

impl std::ops::Deref for Signature {
    type Target = alloy_primitives::Signature;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<alloy_primitives::Signature> for Signature {
    fn from(s: alloy_primitives::Signature) -> Self {
        Self(s)
    }
}

impl Ord for Signature {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(&other.0.as_bytes())
    }
}

impl PartialOrd for Signature {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        alloy_primitives::Bytes::copy_from_slice(&self.to_bytes()).serialize(s)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let b = alloy_primitives::Bytes::deserialize(d)?;
        Self::from_bytes(&b).map_err(serde::de::Error::custom)
    }
}

impl Committable for Signature {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("Signature")
            .fixed_size_bytes(&self.to_bytes())
            .finalize()
    }
}

// Signer wrapper
#[derive(Clone)]
pub struct Signer(PrivateKeySigner);

impl Signer {
    pub fn random() -> Self {
        Self(PrivateKeySigner::random())
    }

    pub fn address(&self) -> Address {
        Address(self.0.address())
    }

    pub fn sign_message(&self, msg: &[u8]) -> Result<Signature, alloy_signer::Error> {
        self.0.sign_message_sync(msg).map(Signature)
    }

    pub fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        self.0.sign_hash_sync(hash).map(Signature)
    }

    pub fn inner(&self) -> &PrivateKeySigner {
        &self.0
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signer").field(&self.0.address()).finish()
    }
}

impl FromStr for Signer {
    type Err = LocalSignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrivateKeySigner::from_str(s).map(Self)
    }
}

impl From<PrivateKeySigner> for Signer {
    fn from(signer: PrivateKeySigner) -> Self {
        Signer(signer)
    }
}

#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(alloy_primitives::ChainId);

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        ChainId(value)
    }
}

impl From<ChainId> for u64 {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Committable for ChainId {
    fn commit(&self) -> Commitment<Self> {
        RawCommitmentBuilder::new("ChainId").u64(self.0).finalize()
    }
}
