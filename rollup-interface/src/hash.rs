//! 32-byte settlement-chain digests and linear accumulators.

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// An opaque 32-byte hash. Equality is byte identity.
///
/// Keccak-256 is fixed because it is the digest the settlement chain's ABI
/// uses; every composite digest in this workspace bottoms out here.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Byte length of a hash.
    pub const LEN: usize = 32;

    /// The all-zero hash, used as the empty-accumulator sentinel.
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

/// A 20-byte settlement-chain account address.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

/// Keccak-256 of `data`.
pub fn keccak(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Keccak-256 over the concatenation of `parts`, without materialising the
/// joined buffer.
pub fn keccak_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Extend a linear accumulator: `acc' = keccak(acc ‖ item)`.
///
/// The accumulator of the empty sequence is [`Hash::zero`].
pub fn extend_accumulator(acc: Hash, item: Hash) -> Hash {
    keccak_concat(&[acc.as_ref(), item.as_ref()])
}

/// Fold a sequence of item hashes into an accumulator, starting from the
/// empty sentinel.
pub fn accumulate<I: IntoIterator<Item = Hash>>(items: I) -> Hash {
    items
        .into_iter()
        .fold(Hash::zero(), extend_accumulator)
}
