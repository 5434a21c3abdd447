// bridge-codec/src/address.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::hash::{checksum, CHECKSUM_SIZE};
use crate::quantity::strip_hex_prefix;
use crate::{CodecError, CodecResult};

/// Raw address payload size in bytes
pub const ADDRESS_SIZE: usize = 20;

const MAIN_PREFIX: u8 = 0x3a;
const TEST_PREFIX: u8 = 0x78;

/// Network the backend node runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Main,
    Test,
    RegTest,
}

impl Chain {
    /// Tag as reported by `getblockchaininfo`
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Main => "main",
            Chain::Test => "test",
            Chain::RegTest => "regtest",
        }
    }

    /// Base58check version byte for pay-to-pubkey-hash addresses
    pub fn address_prefix(&self) -> u8 {
        match self {
            Chain::Main => MAIN_PREFIX,
            Chain::Test | Chain::RegTest => TEST_PREFIX,
        }
    }

    /// EIP-155 chain id reported to Ethereum clients
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Main => 81,
            Chain::Test => 8889,
            Chain::RegTest => 8890,
        }
    }
}

impl FromStr for Chain {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(Chain::Main),
            "test" => Ok(Chain::Test),
            "regtest" => Ok(Chain::RegTest),
            other => Err(CodecError::InvalidChain(other.to_string())),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 20-byte address in its raw form
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HexAddress([u8; ADDRESS_SIZE]);

impl HexAddress {
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> CodecResult<Self> {
        if slice.len() != ADDRESS_SIZE {
            return Err(CodecError::InvalidAddress(hex::encode(slice)));
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// The zero address, used where a transaction has no sender or receiver
    pub fn zero() -> Self {
        Self([0u8; ADDRESS_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex without prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    pub fn from_hex(s: &str) -> CodecResult<Self> {
        let bytes = hex::decode(strip_hex_prefix(s))
            .map_err(|_| CodecError::InvalidAddress(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for HexAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexAddress({})", self.to_prefixed_hex())
    }
}

impl fmt::Display for HexAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_hex())
    }
}

impl Serialize for HexAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_hex())
    }
}

impl<'de> Deserialize<'de> for HexAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HexAddress::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Encode a raw address as base58check for the given chain
pub fn encode_address(address: &HexAddress, chain: Chain) -> String {
    let mut payload = Vec::with_capacity(1 + ADDRESS_SIZE + CHECKSUM_SIZE);
    payload.push(chain.address_prefix());
    payload.extend_from_slice(address.as_bytes());
    let sum = checksum(&payload);
    payload.extend_from_slice(&sum);
    bs58::encode(payload).into_string()
}

/// Encode a hex address string for a chain given by its tag
pub fn encode_hex_address(hex_address: &str, chain_tag: &str) -> CodecResult<String> {
    let chain = chain_tag.parse::<Chain>()?;
    let address = HexAddress::from_hex(hex_address)?;
    Ok(encode_address(&address, chain))
}

/// Decode a base58check address to its 20-byte payload.
///
/// The version byte and checksum are not verified; addresses reaching this
/// function have already been produced by the backend.
pub fn decode_address(base58: &str) -> CodecResult<HexAddress> {
    let decoded = bs58::decode(base58)
        .into_vec()
        .map_err(|e| CodecError::InvalidAddress(format!("{}: {}", base58, e)))?;
    if decoded.len() < 1 + ADDRESS_SIZE + 1 {
        return Err(CodecError::AddressTooShort(decoded.len()));
    }
    HexAddress::from_slice(&decoded[1..1 + ADDRESS_SIZE])
}
