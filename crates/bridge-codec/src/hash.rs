// bridge-codec/src/hash.rs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::fmt;

use crate::{quantity::strip_hex_prefix, CodecError, CodecResult};

/// Hash output size in bytes
pub const HASH_SIZE: usize = 32;

/// Length of the base58check checksum
pub const CHECKSUM_SIZE: usize = 4;

/// A 32-byte hash value (block hashes, transaction ids, keccak digests)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a hash from a slice (returns error if wrong length)
    pub fn from_slice(slice: &[u8]) -> CodecResult<Self> {
        if slice.len() != HASH_SIZE {
            return Err(CodecError::InvalidHex(format!(
                "expected {} bytes, got {}",
                HASH_SIZE,
                slice.len()
            )));
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The all-zero hash, looked up by health checks
    pub fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    /// Hex without prefix, the form the backend expects
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex with `0x` prefix, the form Ethereum clients expect
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// Parse from hex, with or without `0x`
    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let bytes = hex::decode(strip_hex_prefix(s))
            .map_err(|e| CodecError::InvalidHex(format!("{}: {}", s, e)))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hash({}...{})",
            hex::encode(&self.0[..4]),
            hex::encode(&self.0[28..])
        )
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

/// SHA-256 applied twice
pub fn double_sha256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    Hash::new(Sha256::digest(first).into())
}

/// First four bytes of the double SHA-256 digest
pub fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = double_sha256(data);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_SIZE]);
    out
}

/// Ethereum's Keccak-256 (pre-standard SHA-3 padding)
pub fn keccak256(data: &[u8]) -> Hash {
    Hash::new(Keccak256::digest(data).into())
}
