// bridge-codec/src/lib.rs

//! Stateless conversions between the Ethereum view of the world and the
//! backend node's UTXO view.
//!
//! This crate provides:
//! - Hex and base58check address encoding with chain-specific prefixes
//! - Wei and native coin amount conversion (18 vs 8 decimals)
//! - Hex quantity encoding and decoding
//! - Output script classification and contract script parsing

pub mod address;
pub mod amount;
pub mod hash;
pub mod quantity;
pub mod script;

pub use address::{decode_address, encode_address, encode_hex_address, Chain, HexAddress, ADDRESS_SIZE};
pub use amount::{
    gas_price_from_wei, min_gas_price_wei, NativeAmount, MIN_GAS_PRICE_SATOSHI, WEI_PER_SATOSHI,
};
pub use hash::{checksum, double_sha256, keccak256, Hash, HASH_SIZE};
pub use quantity::{
    add_hex_prefix, decode_big, decode_big_auto, decode_bytes, decode_u64, encode_big, encode_padded,
    encode_u64, has_hex_prefix, is_eth_hex_address, strip_hex_prefix,
};
pub use script::{op_sender_from_asm, ContractOp, ContractScript, ScriptType};

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("address too short: decoded {0} bytes, need at least 22")]
    AddressTooShort(usize),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed number: {0}")]
    MalformedNumber(String),

    #[error("precision loss converting {0}")]
    PrecisionLoss(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unknown script type: {0}")]
    UnknownScriptType(String),

    #[error("malformed contract script: {0}")]
    MalformedScript(String),
}
