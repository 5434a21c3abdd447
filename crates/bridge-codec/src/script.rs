// bridge-codec/src/script.rs

//! Output script inspection.
//!
//! Two jobs live here: classifying unspent outputs by their scriptPubKey
//! template, and pulling contract call/create parameters out of a
//! disassembled output script.

use std::fmt;
use std::str::FromStr;

use crate::address::HexAddress;
use crate::{CodecError, CodecResult};

/// Template an unspent output's script matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// Request-side wildcard, never produced by classification
    All,
    Unknown,
    OpReturn,
    /// Request-side marker for stake outputs that have not matured
    Immature,
    P2pk,
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2shP2wpkh,
    P2shP2wsh,
    P2ms,
}

impl ScriptType {
    pub const VARIANTS: [ScriptType; 12] = [
        ScriptType::All,
        ScriptType::Unknown,
        ScriptType::OpReturn,
        ScriptType::Immature,
        ScriptType::P2pk,
        ScriptType::P2pkh,
        ScriptType::P2sh,
        ScriptType::P2wpkh,
        ScriptType::P2wsh,
        ScriptType::P2shP2wpkh,
        ScriptType::P2shP2wsh,
        ScriptType::P2ms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::All => "all",
            ScriptType::Unknown => "unknown",
            ScriptType::OpReturn => "opreturn",
            ScriptType::Immature => "immature",
            ScriptType::P2pk => "P2PK",
            ScriptType::P2pkh => "P2PKH",
            ScriptType::P2sh => "P2SH",
            ScriptType::P2wpkh => "P2WPKH",
            ScriptType::P2wsh => "P2WSH",
            ScriptType::P2shP2wpkh => "P2SHP2WPKH",
            ScriptType::P2shP2wsh => "P2SHP2WSH",
            ScriptType::P2ms => "P2MS",
        }
    }

    /// Classify a scriptPubKey, optionally looking through a P2SH redeem script.
    ///
    /// Matching is on exact length and fixed-position opcodes only.
    pub fn classify(script: &[u8], redeem_script: Option<&[u8]>) -> ScriptType {
        if is_p2pk(script) {
            ScriptType::P2pk
        } else if is_p2pkh(script) {
            ScriptType::P2pkh
        } else if is_p2sh(script) {
            match redeem_script {
                Some(redeem) if redeem.len() == 23 && redeem.starts_with(&[0x16, 0x00, 0x14]) => {
                    ScriptType::P2shP2wpkh
                }
                Some(redeem) if redeem.len() == 35 && redeem.starts_with(&[0x22, 0x00, 0x20]) => {
                    ScriptType::P2shP2wsh
                }
                _ => ScriptType::P2sh,
            }
        } else if script.len() == 22 && script.starts_with(&[0x00, 0x14]) {
            ScriptType::P2wpkh
        } else if script.len() == 34 && script.starts_with(&[0x00, 0x20]) {
            ScriptType::P2wsh
        } else {
            ScriptType::Unknown
        }
    }

    /// Classify a hex-encoded scriptPubKey; undecodable hex is `Unknown`
    pub fn classify_hex(script_hex: &str, redeem_hex: Option<&str>) -> ScriptType {
        let script = match hex::decode(script_hex) {
            Ok(bytes) => bytes,
            Err(_) => return ScriptType::Unknown,
        };
        let redeem = redeem_hex.and_then(|r| hex::decode(r).ok());
        Self::classify(&script, redeem.as_deref())
    }
}

fn is_p2pk(script: &[u8]) -> bool {
    script.len() == 35 && script[0] == 0x21 && script[34] == 0xac
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25 && script.starts_with(&[0x76, 0xa9, 0x14]) && script.ends_with(&[0x88, 0xac])
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script.starts_with(&[0xa9, 0x14]) && script[22] == 0x87
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        ScriptType::VARIANTS
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CodecError::UnknownScriptType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractOp {
    Call,
    Create,
}

/// Parameters of a contract output, as read from its disassembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractScript {
    pub op: ContractOp,
    pub sender: Option<HexAddress>,
    pub gas_limit: u64,
    /// Satoshi per gas
    pub gas_price: u64,
    /// Call data or init code, hex without prefix
    pub data: String,
    /// Target contract for calls
    pub contract: Option<HexAddress>,
}

impl ContractScript {
    /// Parse an output's ASM; `Ok(None)` when it is not a contract output.
    ///
    /// Layouts:
    /// `[<type> <sender> <sig> OP_SENDER] <version> <gas> <price> <data> <contract> OP_CALL`
    /// `[<type> <sender> <sig> OP_SENDER] <version> <gas> <price> <code> OP_CREATE`
    pub fn parse_asm(asm: &str) -> CodecResult<Option<ContractScript>> {
        let tokens: Vec<&str> = asm.split_whitespace().collect();
        let op = match tokens.last() {
            Some(&"OP_CALL") => ContractOp::Call,
            Some(&"OP_CREATE") => ContractOp::Create,
            _ => return Ok(None),
        };

        let (sender, body) = match tokens.iter().position(|t| *t == "OP_SENDER") {
            Some(idx) if idx >= 3 => {
                let sender = HexAddress::from_hex(tokens[idx - 2])
                    .map_err(|_| CodecError::MalformedScript(asm.to_string()))?;
                (Some(sender), &tokens[idx + 1..tokens.len() - 1])
            }
            Some(_) => return Err(CodecError::MalformedScript(asm.to_string())),
            None => (None, &tokens[..tokens.len() - 1]),
        };

        let expected = match op {
            ContractOp::Call => 5,
            ContractOp::Create => 4,
        };
        if body.len() != expected {
            return Err(CodecError::MalformedScript(asm.to_string()));
        }

        let gas_limit = parse_script_number(body[1])?;
        let gas_price = parse_script_number(body[2])?;
        let data = body[3].to_string();
        let contract = match op {
            ContractOp::Call => Some(
                HexAddress::from_hex(body[4])
                    .map_err(|_| CodecError::MalformedScript(asm.to_string()))?,
            ),
            ContractOp::Create => None,
        };

        Ok(Some(ContractScript {
            op,
            sender,
            gas_limit,
            gas_price,
            data,
            contract,
        }))
    }
}

/// Sender address pushed before OP_SENDER, if any
pub fn op_sender_from_asm(asm: &str) -> Option<HexAddress> {
    let tokens: Vec<&str> = asm.split_whitespace().collect();
    let idx = tokens.iter().position(|t| *t == "OP_SENDER")?;
    if idx < 3 {
        return None;
    }
    HexAddress::from_hex(tokens[idx - 2]).ok()
}

/// Script numbers are shown in decimal for small pushes and as
/// little-endian hex for wider ones.
fn parse_script_number(token: &str) -> CodecResult<u64> {
    if let Ok(n) = token.parse::<u64>() {
        return Ok(n);
    }
    let bytes =
        hex::decode(token).map_err(|_| CodecError::MalformedNumber(token.to_string()))?;
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(CodecError::MalformedNumber(token.to_string()));
    }
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_CALL_ASM: &str = "1 81e872329e767a0487de7e970992b13b644f1f4f 6b483045022100b83ef90bc808569fb00e29a0f6209d32c1795207c95a554c091401ac8fa8ab920220694b7ec801efd2facea2026d12e8eb5de7689c637f539a620f24c6da8fff235f0121021104b7672c2e08fe321f1bfaffc3768c2777adeedb857b4313ed9d2f15fc8ce4 OP_SENDER 4 55000 40 a9059cbb000000000000000000000000710e94d7f8a5d7a1e5be52bd783370d6e3008a2a0000000000000000000000000000000000000000000000000000000005f5e100 af1ae4e29253ba755c723bca25e883b8deb777b8 OP_CALL";

    #[test]
    fn test_classify_p2pkh() {
        let script = hex::decode("76a9143ade697fc8030489727bbb6af6a68f0a9eab2ec188ac").unwrap();
        assert_eq!(script.len(), 25);
        assert_eq!(ScriptType::classify(&script, None), ScriptType::P2pkh);
    }

    #[test]
    fn test_classify_witness() {
        let mut p2wpkh = vec![0x00, 0x14];
        p2wpkh.extend_from_slice(&[0xab; 20]);
        assert_eq!(ScriptType::classify(&p2wpkh, None), ScriptType::P2wpkh);

        let mut p2wsh = vec![0x00, 0x20];
        p2wsh.extend_from_slice(&[0xcd; 32]);
        assert_eq!(ScriptType::classify(&p2wsh, None), ScriptType::P2wsh);
    }

    #[test]
    fn test_classify_p2pk_and_p2sh() {
        let mut p2pk = vec![0x21];
        p2pk.extend_from_slice(&[0x02; 33]);
        p2pk.push(0xac);
        assert_eq!(ScriptType::classify(&p2pk, None), ScriptType::P2pk);

        let mut p2sh = vec![0xa9, 0x14];
        p2sh.extend_from_slice(&[0x11; 20]);
        p2sh.push(0x87);
        assert_eq!(ScriptType::classify(&p2sh, None), ScriptType::P2sh);

        let mut nested = vec![0x16, 0x00, 0x14];
        nested.extend_from_slice(&[0x22; 20]);
        assert_eq!(ScriptType::classify(&p2sh, Some(&nested)), ScriptType::P2shP2wpkh);

        let mut nested_wsh = vec![0x22, 0x00, 0x20];
        nested_wsh.extend_from_slice(&[0x33; 32]);
        assert_eq!(ScriptType::classify(&p2sh, Some(&nested_wsh)), ScriptType::P2shP2wsh);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(ScriptType::classify(&[0x6a, 0x01, 0x02], None), ScriptType::Unknown);
        assert_eq!(ScriptType::classify_hex("not hex", None), ScriptType::Unknown);
        // right length, wrong opcodes
        assert_eq!(ScriptType::classify(&[0u8; 25], None), ScriptType::Unknown);
    }

    #[test]
    fn test_parse_type_names() {
        assert_eq!("p2pkh".parse::<ScriptType>().unwrap(), ScriptType::P2pkh);
        assert_eq!("ALL".parse::<ScriptType>().unwrap(), ScriptType::All);
        assert_eq!("Immature".parse::<ScriptType>().unwrap(), ScriptType::Immature);
        assert!("p2tr".parse::<ScriptType>().is_err());
    }

    #[test]
    fn test_op_sender() {
        let sender = op_sender_from_asm(SENDER_CALL_ASM).unwrap();
        assert_eq!(sender.to_hex(), "81e872329e767a0487de7e970992b13b644f1f4f");
        assert!(op_sender_from_asm("OP_DUP OP_HASH160").is_none());
    }

    #[test]
    fn test_parse_call_with_sender() {
        let info = ContractScript::parse_asm(SENDER_CALL_ASM).unwrap().unwrap();
        assert_eq!(info.op, ContractOp::Call);
        assert_eq!(info.gas_limit, 55000);
        assert_eq!(info.gas_price, 40);
        assert!(info.data.starts_with("a9059cbb"));
        assert_eq!(
            info.contract.unwrap().to_hex(),
            "af1ae4e29253ba755c723bca25e883b8deb777b8"
        );
        assert_eq!(
            info.sender.unwrap().to_hex(),
            "81e872329e767a0487de7e970992b13b644f1f4f"
        );
    }

    #[test]
    fn test_parse_create() {
        let info = ContractScript::parse_asm("4 2500000 40 6060604052 OP_CREATE")
            .unwrap()
            .unwrap();
        assert_eq!(info.op, ContractOp::Create);
        assert_eq!(info.gas_limit, 2_500_000);
        assert!(info.contract.is_none());
        assert!(info.sender.is_none());
    }

    #[test]
    fn test_parse_not_contract() {
        let asm = "OP_DUP OP_HASH160 3ade697fc8030489727bbb6af6a68f0a9eab2ec1 OP_EQUALVERIFY OP_CHECKSIG";
        assert!(ContractScript::parse_asm(asm).unwrap().is_none());
        assert!(ContractScript::parse_asm("4 OP_CALL").is_err());
    }

    #[test]
    fn test_script_number_little_endian() {
        assert_eq!(parse_script_number("a0860100").unwrap(), 100_000);
        assert_eq!(parse_script_number("55000").unwrap(), 55_000);
    }
}
