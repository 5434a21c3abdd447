// rpc/src/params.rs

//! Parsing of the polymorphic Ethereum request parameters.
//!
//! Every shape that may arrive as more than one JSON type is decoded into an
//! explicit enum by inspecting the token first.

use bridge_backend::types::SearchLogsRequest;
use bridge_backend::Backend;
use bridge_codec::{decode_big_auto, decode_u64, gas_price_from_wei, strip_hex_prefix, NativeAmount};
use num_bigint::BigUint;
use serde::Deserialize;
use serde_json::Value;

use crate::{BackendContext, RpcError, RpcResult};

/// Gas limit used when a transaction request leaves it out
pub const DEFAULT_GAS_LIMIT: u64 = 250_000;

/// Gas price (wei) used when a transaction request leaves it out
pub const DEFAULT_GAS_PRICE_WEI: u64 = 40_000_000_000;

/// Params must be a JSON array; a missing `params` member counts as empty
pub fn params_array(params: Value) -> RpcResult<Vec<Value>> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Array(values) => Ok(values),
        _ => Err(RpcError::InvalidParams("Expected array".into())),
    }
}

/// Require at least `min` positional params
pub fn expect_len(params: &[Value], min: usize) -> RpcResult<()> {
    if params.len() < min {
        return Err(RpcError::InvalidParams(format!(
            "missing value for required argument {}",
            params.len()
        )));
    }
    Ok(())
}

pub fn string_param<'a>(params: &'a [Value], idx: usize, name: &str) -> RpcResult<&'a str> {
    params
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams(format!("{} must be a string", name)))
}

/// Optional boolean flag; absent means false
pub fn bool_param(params: &[Value], idx: usize) -> RpcResult<bool> {
    match params.get(idx) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(RpcError::InvalidParams("expected boolean".into())),
    }
}

/// Hex quantity param, e.g. an index
pub fn quantity_param(params: &[Value], idx: usize, name: &str) -> RpcResult<u64> {
    let raw = string_param(params, idx, name)?;
    Ok(decode_u64(raw)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Earliest,
    Pending,
    Number(u64),
}

impl BlockTag {
    /// Decode a block parameter.
    ///
    /// Numbers are taken as decimal, strings must be a tag or `0x` hex. An
    /// empty or missing value means `latest` when `default_latest` is set.
    pub fn parse(value: Option<&Value>, default_latest: bool) -> RpcResult<Self> {
        let raw = match value {
            None | Some(Value::Null) => "",
            Some(Value::Number(n)) => {
                return n
                    .as_u64()
                    .map(BlockTag::Number)
                    .ok_or_else(|| RpcError::InvalidParams(format!("invalid block number {}", n)));
            }
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(RpcError::InvalidParams(format!(
                    "invalid block parameter {}",
                    other
                )))
            }
        };
        match raw {
            "" if default_latest => Ok(BlockTag::Latest),
            "" => Err(RpcError::InvalidParams("empty parameter value".into())),
            "latest" => Ok(BlockTag::Latest),
            "earliest" => Ok(BlockTag::Earliest),
            "pending" => Ok(BlockTag::Pending),
            s if !s.starts_with("0x") => Err(RpcError::InvalidParams(
                "quantity values must start with 0x".into(),
            )),
            s => Ok(BlockTag::Number(decode_u64(s)?)),
        }
    }

    /// Resolve to a concrete height
    pub async fn resolve(&self, backend: &Backend) -> RpcResult<u64> {
        match self {
            BlockTag::Latest => Ok(backend
                .get_blockchain_info()
                .await
                .context("getblockchaininfo")?
                .blocks),
            BlockTag::Earliest => Ok(0),
            BlockTag::Pending => Err(RpcError::InvalidRequest(
                "pending block is not supported".into(),
            )),
            BlockTag::Number(n) => Ok(*n),
        }
    }
}

/// `address` of a log query: one address or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AddressFilter {
    #[default]
    Any,
    Single(String),
    Many(Vec<String>),
}

impl AddressFilter {
    pub fn parse(value: Option<&Value>) -> RpcResult<Self> {
        match value {
            None | Some(Value::Null) => Ok(AddressFilter::Any),
            Some(Value::String(s)) => Ok(AddressFilter::Single(s.clone())),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        RpcError::InvalidParams("address list must hold strings".into())
                    })
                })
                .collect::<RpcResult<Vec<_>>>()
                .map(AddressFilter::Many),
            Some(_) => Err(RpcError::InvalidParams("invalid address filter".into())),
        }
    }

    /// Backend form: unprefixed hex
    pub fn to_backend(&self) -> Vec<String> {
        match self {
            AddressFilter::Any => Vec::new(),
            AddressFilter::Single(a) => vec![strip_hex_prefix(a).to_lowercase()],
            AddressFilter::Many(list) => list
                .iter()
                .map(|a| strip_hex_prefix(a).to_lowercase())
                .collect(),
        }
    }
}

/// Constraint on one topic position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    Any,
    Exact(String),
    OneOf(Vec<String>),
}

impl TopicFilter {
    fn parse(value: &Value) -> RpcResult<Self> {
        match value {
            Value::Null => Ok(TopicFilter::Any),
            Value::String(s) => Ok(TopicFilter::Exact(normalize_topic(s))),
            Value::Array(items) => {
                let mut alternatives = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        // a null alternative matches anything
                        Value::Null => return Ok(TopicFilter::Any),
                        Value::String(s) => alternatives.push(normalize_topic(s)),
                        _ => return Err(RpcError::InvalidParams("invalid topic".into())),
                    }
                }
                Ok(match alternatives.len() {
                    0 => TopicFilter::Any,
                    1 => TopicFilter::Exact(alternatives.remove(0)),
                    _ => TopicFilter::OneOf(alternatives),
                })
            }
            _ => Err(RpcError::InvalidParams("invalid topic".into())),
        }
    }

    fn accepts(&self, topic: Option<&String>) -> bool {
        match self {
            TopicFilter::Any => true,
            TopicFilter::Exact(want) => topic.map_or(false, |t| normalize_topic(t) == *want),
            TopicFilter::OneOf(options) => {
                topic.map_or(false, |t| options.contains(&normalize_topic(t)))
            }
        }
    }

    fn to_backend(&self) -> Vec<String> {
        match self {
            TopicFilter::Any => Vec::new(),
            TopicFilter::Exact(t) => vec![t.clone()],
            TopicFilter::OneOf(list) => list.clone(),
        }
    }
}

fn normalize_topic(topic: &str) -> String {
    strip_hex_prefix(topic).to_lowercase()
}

pub fn parse_topics(value: Option<&Value>) -> RpcResult<Vec<TopicFilter>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(TopicFilter::parse).collect(),
        Some(_) => Err(RpcError::InvalidParams("topics must be an array".into())),
    }
}

pub fn topics_to_backend(filters: &[TopicFilter]) -> Vec<Vec<String>> {
    filters.iter().map(TopicFilter::to_backend).collect()
}

/// Positional topic match; positions past the end of `filters` are free
pub fn topics_match(filters: &[TopicFilter], topics: &[String]) -> bool {
    filters
        .iter()
        .enumerate()
        .all(|(i, filter)| filter.accepts(topics.get(i)))
}

/// Log query of `eth_getLogs` / `eth_newFilter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub from_block: BlockTag,
    pub to_block: BlockTag,
    pub address: AddressFilter,
    pub topics: Vec<TopicFilter>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            from_block: BlockTag::Latest,
            to_block: BlockTag::Latest,
            address: AddressFilter::Any,
            topics: Vec::new(),
        }
    }
}

impl LogQuery {
    pub fn parse(value: Option<&Value>) -> RpcResult<Self> {
        let obj = match value {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(obj)) => obj,
            Some(_) => return Err(RpcError::InvalidParams("filter must be an object".into())),
        };
        if obj.contains_key("blockHash") {
            return Err(RpcError::InvalidParams("blockHash filters are not supported".into()));
        }
        Ok(Self {
            from_block: BlockTag::parse(obj.get("fromBlock"), true)?,
            to_block: BlockTag::parse(obj.get("toBlock"), true)?,
            address: AddressFilter::parse(obj.get("address"))?,
            topics: parse_topics(obj.get("topics"))?,
        })
    }

    /// Address and topic part of a query over a concrete block range
    pub fn with_range(&self, from: u64, to: u64) -> SearchLogsRequest {
        SearchLogsRequest {
            from_block: from,
            to_block: to,
            addresses: self.address.to_backend(),
            topics: topics_to_backend(&self.topics),
            minimum_confirmations: None,
        }
    }
}

/// Transaction object of `eth_sendTransaction`, `eth_call` and `eth_estimateGas`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, alias = "input")]
    pub data: Option<String>,
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

impl TransactionRequest {
    /// First element of `params`
    pub fn from_params(params: &[Value]) -> RpcResult<Self> {
        let raw = params
            .first()
            .ok_or_else(|| RpcError::InvalidParams("missing transaction object".into()))?;
        serde_json::from_value(raw.clone()).map_err(|e| RpcError::InvalidParams(e.to_string()))
    }

    pub fn to(&self) -> Option<&str> {
        non_empty(&self.to)
    }

    pub fn from(&self) -> Option<&str> {
        non_empty(&self.from)
    }

    pub fn data(&self) -> Option<&str> {
        non_empty(&self.data).filter(|d| !strip_hex_prefix(d).is_empty())
    }

    pub fn value(&self) -> Option<&str> {
        non_empty(&self.value)
    }

    pub fn is_create_contract(&self) -> bool {
        self.to().is_none() && self.data().is_some()
    }

    pub fn is_send_ether(&self) -> bool {
        self.value().is_some() && self.to().is_some() && self.data().is_none()
    }

    pub fn is_call_contract(&self) -> bool {
        self.to().is_some() && self.data().is_some()
    }

    /// Gas limit, or the default when not given
    pub fn gas_limit(&self) -> RpcResult<u64> {
        match non_empty(&self.gas) {
            Some(gas) => Ok(decode_u64(gas)?),
            None => Ok(DEFAULT_GAS_LIMIT),
        }
    }

    /// Gas price converted to satoshi per gas, with the default and floor applied
    pub fn gas_price(&self) -> RpcResult<NativeAmount> {
        let wei = match non_empty(&self.gas_price) {
            Some(price) => decode_big_auto(price)?,
            None => BigUint::from(DEFAULT_GAS_PRICE_WEI),
        };
        Ok(gas_price_from_wei(&wei))
    }

    /// Value in native units; missing means zero
    pub fn amount(&self) -> RpcResult<NativeAmount> {
        match self.value() {
            Some(value) => Ok(NativeAmount::from_wei(&decode_big_auto(value)?)),
            None => Ok(NativeAmount::zero()),
        }
    }
}
