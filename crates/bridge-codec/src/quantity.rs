// bridge-codec/src/quantity.rs

//! Ethereum hex quantities: `0x`-prefixed, lowercase, no leading zeros.

use num_bigint::BigUint;
use num_traits::Num;

use crate::{CodecError, CodecResult};

/// Strip a leading `0x`/`0X` if present
pub fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Prepend `0x` unless the string already carries it
pub fn add_hex_prefix(s: &str) -> String {
    if s.starts_with("0x") || s.starts_with("0X") {
        s.to_string()
    } else {
        format!("0x{}", s)
    }
}

pub fn has_hex_prefix(s: &str) -> bool {
    s.starts_with("0x") || s.starts_with("0X")
}

pub fn encode_u64(n: u64) -> String {
    format!("0x{:x}", n)
}

pub fn encode_big(n: &BigUint) -> String {
    format!("0x{}", n.to_str_radix(16))
}

/// Fixed-width hex, e.g. the 8-byte block nonce
pub fn encode_padded(n: u64, width: usize) -> String {
    format!("0x{:0width$x}", n, width = width)
}

pub fn decode_u64(s: &str) -> CodecResult<u64> {
    let digits = strip_hex_prefix(s.trim());
    if digits.is_empty() {
        return Err(CodecError::MalformedNumber(s.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| CodecError::MalformedNumber(s.to_string()))
}

pub fn decode_big(s: &str) -> CodecResult<BigUint> {
    let digits = strip_hex_prefix(s.trim());
    if digits.is_empty() {
        return Err(CodecError::MalformedNumber(s.to_string()));
    }
    BigUint::from_str_radix(digits, 16).map_err(|_| CodecError::MalformedNumber(s.to_string()))
}

/// Decode `0x`-prefixed hex as big integer, plain digits as decimal
pub fn decode_big_auto(s: &str) -> CodecResult<BigUint> {
    let trimmed = s.trim();
    if has_hex_prefix(trimmed) {
        decode_big(trimmed)
    } else {
        BigUint::from_str_radix(trimmed, 10)
            .map_err(|_| CodecError::MalformedNumber(s.to_string()))
    }
}

/// True for 40 hex digits, with or without `0x`
pub fn is_eth_hex_address(s: &str) -> bool {
    let digits = strip_hex_prefix(s);
    digits.len() == 40 && digits.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode hex data (`0x` optional) into bytes
pub fn decode_bytes(s: &str) -> CodecResult<Vec<u8>> {
    hex::decode(strip_hex_prefix(s)).map_err(|e| CodecError::InvalidHex(format!("{}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_helpers() {
        assert_eq!(strip_hex_prefix("0xabc"), "abc");
        assert_eq!(strip_hex_prefix("abc"), "abc");
        assert_eq!(add_hex_prefix("abc"), "0xabc");
        assert_eq!(add_hex_prefix("0xabc"), "0xabc");
    }

    #[test]
    fn test_encode_quantity() {
        assert_eq!(encode_u64(0), "0x0");
        assert_eq!(encode_u64(22000), "0x55f0");
        assert_eq!(encode_padded(42, 16), "0x000000000000002a");
        assert_eq!(encode_big(&BigUint::from(40_000_000_000u64)), "0x9502f9000");
    }

    #[test]
    fn test_decode_quantity() {
        assert_eq!(decode_u64("0x10").unwrap(), 16);
        assert_eq!(decode_u64("ff").unwrap(), 255);
        assert!(decode_u64("0x").is_err());
        assert!(decode_u64("0xzz").is_err());
        assert_eq!(decode_big_auto("100").unwrap(), BigUint::from(100u32));
        assert_eq!(decode_big_auto("0x100").unwrap(), BigUint::from(256u32));
    }

    #[test]
    fn test_is_eth_hex_address() {
        assert!(is_eth_hex_address("0x6c89a1a6ca2ae7c00b248bb2832d6f480f27da68"));
        assert!(is_eth_hex_address("6c89a1a6ca2ae7c00b248bb2832d6f480f27da68"));
        assert!(!is_eth_hex_address("qTTH1Yr2eKCuDLqfxUyBLCAjmomQ8pyrBt"));
        assert!(!is_eth_hex_address("0x1234"));
    }
}
