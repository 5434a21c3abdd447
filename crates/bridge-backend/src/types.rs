// bridge-backend/src/types.rs

//! Request and response shapes of the backend node's RPC methods.
//!
//! Only fields this bridge reads are modelled; the backend sends more.

use bridge_codec::{op_sender_from_asm, ContractScript, HexAddress, NativeAmount};
use rust_decimal::Decimal;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::{BackendError, BackendResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    #[serde(default, rename = "bestblockhash")]
    pub best_block_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockResponse {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "merkleroot")]
    pub merkle_root: String,
    #[serde(default, rename = "hashStateRoot")]
    pub hash_state_root: String,
    #[serde(default)]
    pub tx: Vec<String>,
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: String,
    #[serde(default, rename = "nextblockhash")]
    pub next_block_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionResponse {
    #[serde(default, rename = "blockhash")]
    pub block_hash: String,
    #[serde(default, rename = "blockindex")]
    pub block_index: u64,
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub confirmations: i64,
}

impl TransactionResponse {
    pub fn is_pending(&self) -> bool {
        self.block_hash.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionInput {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub vout: u32,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "valueSat")]
    pub value_sat: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
    #[serde(default, rename = "type")]
    pub script_type: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl ScriptPubKey {
    pub fn first_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str).filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionOutput {
    #[serde(default)]
    pub value: Decimal,
    #[serde(default, rename = "valueSat")]
    pub value_sat: i64,
    #[serde(default)]
    pub n: u32,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// Verbose `getrawtransaction` result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionResponse {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub hex: String,
    #[serde(default, rename = "blockhash")]
    pub block_hash: String,
    #[serde(default)]
    pub vin: Vec<RawTransactionInput>,
    #[serde(default)]
    pub vout: Vec<RawTransactionOutput>,
}

impl RawTransactionResponse {
    pub fn is_pending(&self) -> bool {
        self.block_hash.is_empty()
    }

    /// Sender pushed with OP_SENDER, when one of the outputs carries it
    pub fn op_sender(&self) -> Option<HexAddress> {
        self.vout
            .iter()
            .find_map(|out| op_sender_from_asm(&out.script_pub_key.asm))
    }
}

/// `decoderawtransaction` result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodedRawTransaction {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub vin: Vec<RawTransactionInput>,
    #[serde(default)]
    pub vout: Vec<RawTransactionOutput>,
}

impl DecodedRawTransaction {
    /// Sum of all output values
    pub fn total_output(&self) -> BackendResult<NativeAmount> {
        let mut total = NativeAmount::zero();
        for out in &self.vout {
            total += &NativeAmount::from_coins(out.value)?;
        }
        Ok(total)
    }

    /// First contract call/create output, if any
    pub fn contract_info(&self) -> BackendResult<Option<ContractScript>> {
        for out in &self.vout {
            if let Some(info) = ContractScript::parse_asm(&out.script_pub_key.asm)? {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }

    pub fn is_contract_creation(&self) -> bool {
        self.vout
            .iter()
            .any(|out| out.script_pub_key.asm.trim_end().ends_with("OP_CREATE"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// One EVM execution result, as returned by `gettransactionreceipt` and `searchlogs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub transaction_index: u64,
    #[serde(default)]
    pub output_index: u64,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub cumulative_gas_used: u64,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub contract_address: String,
    #[serde(default)]
    pub excepted: String,
    #[serde(default)]
    pub log: Vec<BackendLog>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub excepted: String,
    #[serde(default)]
    pub excepted_message: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub new_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContractResponse {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub execution_result: ExecutionResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub code: String,
}

/// `getstorage`: slot index -> (key -> value)
pub type StorageResponse = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub address: String,
    pub txid: String,
    pub output_index: u32,
    pub script: String,
    pub satoshis: u64,
    pub height: i64,
    #[serde(default)]
    pub is_stake: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressBalance {
    pub balance: u64,
    #[serde(default)]
    pub received: u64,
    #[serde(default)]
    pub immature: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub subversion: String,
    #[serde(default)]
    pub connections: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakingInfo {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub staking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningInfo {
    #[serde(default)]
    pub blocks: u64,
    #[serde(default, rename = "networkhashps")]
    pub network_hash_ps: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendToContractResponse {
    pub txid: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub hash160: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContractResponse {
    pub txid: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub hash160: String,
    #[serde(default)]
    pub address: String,
}

/// `sendtocontract` parameters
#[derive(Debug, Clone, Default)]
pub struct SendToContractRequest {
    pub contract: String,
    pub data: String,
    pub amount: NativeAmount,
    pub gas_limit: u64,
    pub gas_price: NativeAmount,
    pub sender: Option<String>,
}

impl SendToContractRequest {
    pub fn to_params(&self) -> Value {
        let mut params = vec![
            json!(self.contract),
            json!(self.data),
            json!(self.amount.to_string()),
            json!(self.gas_limit),
            json!(self.gas_price.to_string()),
        ];
        if let Some(sender) = &self.sender {
            params.push(json!(sender));
        }
        Value::Array(params)
    }
}

/// `createcontract` parameters
#[derive(Debug, Clone, Default)]
pub struct CreateContractRequest {
    pub bytecode: String,
    pub gas_limit: u64,
    pub gas_price: NativeAmount,
    pub sender: Option<String>,
}

impl CreateContractRequest {
    pub fn to_params(&self) -> Value {
        let mut params = vec![
            json!(self.bytecode),
            json!(self.gas_limit),
            json!(self.gas_price.to_string()),
        ];
        if let Some(sender) = &self.sender {
            params.push(json!(sender));
        }
        Value::Array(params)
    }
}

/// `sendtoaddress` parameters
#[derive(Debug, Clone, Default)]
pub struct SendToAddressRequest {
    pub to: String,
    pub amount: NativeAmount,
    pub sender: Option<String>,
}

impl SendToAddressRequest {
    /// Positional: address, amount, comment, comment_to, subtract fee,
    /// replaceable, conf target, estimate mode, avoid reuse, sender, change to sender
    pub fn to_params(&self) -> Value {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return json!([self.to, self.amount.to_string()]),
        };
        json!([
            self.to,
            self.amount.to_string(),
            "",
            "",
            false,
            Value::Null,
            Value::Null,
            "unset",
            Value::Null,
            sender,
            true,
        ])
    }
}

/// `callcontract` parameters
#[derive(Debug, Clone, Default)]
pub struct CallContractRequest {
    pub to: String,
    pub data: String,
    pub from: Option<String>,
    pub gas_limit: Option<u64>,
}

impl CallContractRequest {
    pub fn to_params(&self) -> Value {
        let mut params = vec![json!(self.to), json!(self.data)];
        if let Some(from) = &self.from {
            params.push(json!(from));
            if let Some(gas) = self.gas_limit {
                params.push(json!(gas));
            }
        }
        Value::Array(params)
    }
}

/// Topic constraints for one position: empty means wildcard
pub type SearchLogsTopic = Vec<String>;

/// `searchlogs` parameters.
///
/// The backend only accepts one value per topic position. When any position
/// lists several alternatives, or every position is a wildcard, the topic
/// element is sent as `null` and matching is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct SearchLogsRequest {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<String>,
    pub topics: Vec<SearchLogsTopic>,
    pub minimum_confirmations: Option<u64>,
}

impl SearchLogsRequest {
    fn backend_topics(&self) -> Value {
        if self.topics.iter().any(|t| t.len() > 1) {
            return Value::Null;
        }
        let positions: Vec<Value> = self
            .topics
            .iter()
            .map(|t| t.first().map(|s| json!(s)).unwrap_or(Value::Null))
            .collect();
        if positions.iter().all(Value::is_null) {
            return Value::Null;
        }
        json!({ "topics": positions })
    }
}

impl Serialize for SearchLogsRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.minimum_confirmations.is_some() { 5 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.from_block)?;
        seq.serialize_element(&self.to_block)?;
        seq.serialize_element(&json!({ "addresses": self.addresses }))?;
        seq.serialize_element(&self.backend_topics())?;
        if let Some(confs) = self.minimum_confirmations {
            seq.serialize_element(&confs)?;
        }
        seq.end()
    }
}

/// Decode a backend result into `T`, mapping `null` to `EmptyResponse`
pub fn decode<T: serde::de::DeserializeOwned>(value: Value) -> BackendResult<T> {
    if value.is_null() {
        return Err(BackendError::EmptyResponse);
    }
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}
