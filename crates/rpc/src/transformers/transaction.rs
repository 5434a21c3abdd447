// rpc/src/transformers/transaction.rs

//! Transaction lookup.
//!
//! A hash may name a wallet transaction, a transaction the wallet does not
//! know (block rewards, foreign transfers) or something only visible as a raw
//! transaction. Resolution tries those in that order and always produces a
//! complete record or `None`.

use async_trait::async_trait;
use bridge_backend::types::{DecodedRawTransaction, RawTransactionResponse};
use bridge_backend::{Backend, BackendError};
use bridge_codec::amount::GAS_PRICE_WEI_PER_SATOSHI;
use bridge_codec::{add_hex_prefix, encode_big, encode_u64, strip_hex_prefix, NativeAmount};
use num_bigint::BigUint;
use serde_json::Value;
use std::sync::Arc;

use super::{base58_to_hex, block_number_by_hash, is_not_found, Transformer};
use crate::params::{expect_len, quantity_param, string_param, BlockTag};
use crate::{BackendContext, RequestContext, RpcError, RpcResult, Transaction, ZERO_ADDRESS};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(GetTransactionByHash { backend: backend.clone() }),
        Arc::new(GetTransactionByBlockHashAndIndex { backend: backend.clone() }),
        Arc::new(GetTransactionByBlockNumberAndIndex { backend: backend.clone() }),
    ]
}

/// Where the transaction body came from
struct TransactionSource {
    hex: String,
    block_hash: String,
    block_index: u64,
    generated: bool,
}

impl TransactionSource {
    fn is_pending(&self) -> bool {
        self.block_hash.is_empty()
    }
}

/// Empty record with every field the backend cannot supply zeroed
fn blank_transaction(hash: &str) -> Transaction {
    Transaction {
        hash: add_hex_prefix(hash),
        nonce: "0x0".into(),
        gas: "0x0".into(),
        gas_price: "0x0".into(),
        v: "0x0".into(),
        r: "0x0".into(),
        s: "0x0".into(),
        ..Default::default()
    }
}

/// Resolve a transaction by hash; `Ok(None)` when the backend does not know it
pub async fn resolve_transaction(backend: &Backend, hash: &str) -> RpcResult<Option<Transaction>> {
    let txid = strip_hex_prefix(hash).to_string();

    let (source, mut eth_tx) = match backend.get_transaction(&txid).await {
        Ok(tx) => (
            TransactionSource {
                hex: tx.hex,
                block_hash: tx.block_hash,
                block_index: tx.block_index,
                generated: tx.generated,
            },
            None,
        ),
        Err(BackendError::InvalidAddress(_)) => match reward_transaction(backend, &txid).await {
            Ok((tx, raw)) => {
                tracing::debug!(txid = %txid, "Resolved as reward transaction");
                (
                    TransactionSource {
                        hex: raw.hex,
                        block_hash: raw.block_hash,
                        block_index: 0,
                        generated: false,
                    },
                    Some(tx),
                )
            }
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                tracing::debug!(txid = %txid, error = %e, "Reward lookup failed, falling back to raw transaction");
                match backend.get_raw_transaction(&txid).await {
                    Ok(raw) => (
                        TransactionSource {
                            hex: raw.hex,
                            block_hash: raw.block_hash,
                            block_index: 1,
                            generated: false,
                        },
                        None,
                    ),
                    Err(BackendError::InvalidAddress(_)) => return Ok(None),
                    Err(e) => return Err(RpcError::Callback(e.to_string())),
                }
            }
        },
        Err(e) => return Err(RpcError::Callback(e.to_string())),
    };

    let decoded = backend
        .decode_raw_transaction(&source.hex)
        .await
        .map_err(|_| RpcError::Callback("couldn't get raw transaction".into()))?;

    let mut tx = eth_tx.take().unwrap_or_else(|| blank_transaction(&decoded.txid));

    if !source.is_pending() {
        let number = block_number_by_hash(backend, &source.block_hash)
            .await
            .map_err(|_| RpcError::Callback("couldn't get block number by hash".into()))?;
        tx.block_number = Some(encode_u64(number));
        tx.block_hash = Some(add_hex_prefix(&source.block_hash));
        if tx.transaction_index.is_none() {
            tx.transaction_index = Some(encode_u64(source.block_index));
        }
    }

    if tx.value.is_empty() {
        tx.value = decoded.total_output()?.to_wei_hex()?;
    }

    if let Some(info) = decoded.contract_info()? {
        tx.input = if info.data.is_empty() {
            "0x0".into()
        } else {
            add_hex_prefix(&info.data)
        };
        if let Some(sender) = info.sender {
            tx.from = sender.to_prefixed_hex();
        }
        tx.to = match info.contract {
            Some(contract) => contract.to_prefixed_hex(),
            None => ZERO_ADDRESS.to_string(),
        };
        tx.gas = encode_u64(info.gas_limit);
        tx.gas_price =
            encode_big(&(BigUint::from(info.gas_price) * BigUint::from(GAS_PRICE_WEI_PER_SATOSHI)));
        if tx.from.is_empty() {
            tx.from = sender_of(backend, &decoded).await?;
        }
        return Ok(Some(tx));
    }

    if source.generated {
        tx.from = ZERO_ADDRESS.to_string();
    } else if tx.from.is_empty() {
        tx.from = sender_of(backend, &decoded).await?;
    }
    if tx.to.is_empty() {
        tx.to = receiver_of(&decoded).unwrap_or_else(|| ZERO_ADDRESS.to_string());
    }
    if tx.input.is_empty() {
        tx.input = add_hex_prefix(&source.hex);
    }
    Ok(Some(tx))
}

/// Address of the first input, looked up through the verbose raw transaction
async fn sender_of(backend: &Backend, decoded: &DecodedRawTransaction) -> RpcResult<String> {
    let raw = backend.get_raw_transaction(&decoded.txid).await.map_err(|e| {
        RpcError::Callback(format!(
            "Couldn't get non contract transaction sender address: {}",
            e
        ))
    })?;
    let first = match raw.vin.first() {
        Some(vin) if !vin.address.is_empty() => vin,
        _ => return Ok(ZERO_ADDRESS.to_string()),
    };
    base58_to_hex(&first.address).map_err(|e| {
        RpcError::Callback(format!(
            "Couldn't get non contract transaction sender address: {}",
            e
        ))
    })
}

/// First decodable output address
fn receiver_of(decoded: &DecodedRawTransaction) -> Option<String> {
    decoded
        .vout
        .iter()
        .flat_map(|out| out.script_pub_key.addresses.iter())
        .find(|a| !a.is_empty())
        .and_then(|a| base58_to_hex(a).ok())
}

/// Resolve a transaction the wallet does not track.
///
/// With two or more outputs the first foreign output is the receiver and the
/// value sent to it is net of the fee, apportioned as follows: without a
/// refund to the sender the fee comes out of the sent amount; with a refund it
/// comes out of the refund; with neither the whole transaction was burnt.
pub(crate) async fn reward_transaction(
    backend: &Backend,
    txid: &str,
) -> RpcResult<(Transaction, RawTransactionResponse)> {
    let raw = backend
        .get_raw_transaction(txid)
        .await
        .context("couldn't get raw reward transaction")?;

    let mut tx = blank_transaction(txid);
    tx.input = "0x".into();
    tx.value = "0x0".into();

    if !raw.is_pending() {
        let block = backend
            .get_block(&raw.block_hash)
            .await
            .with_context(|| format!("getblock {}", raw.block_hash))?;
        let index = block
            .tx
            .iter()
            .position(|h| h == txid)
            .ok_or_else(|| RpcError::Callback("couldn't get transaction index in block".into()))?;
        tx.transaction_index = Some(encode_u64(index as u64));
        tx.block_number = Some(encode_u64(block.height));
        tx.block_hash = Some(add_hex_prefix(&raw.block_hash));
    }

    tx.from = ZERO_ADDRESS.to_string();
    if let Some(sender) = raw.op_sender() {
        tx.from = sender.to_prefixed_hex();
    } else if let Some(vin) = raw.vin.first().filter(|v| !v.address.is_empty()) {
        if let Ok(hex) = base58_to_hex(&vin.address) {
            tx.from = hex;
        }
    }
    tx.to = ZERO_ADDRESS.to_string();

    if raw.vout.len() >= 2 {
        let transfer = apportion(&raw)?;
        let sent_to = u64::try_from(transfer.sent_to).map_err(|_| {
            RpcError::Internal(format!("negative amount sent in transaction {}", txid))
        })?;
        tx.value = NativeAmount::from_satoshis(sent_to).to_wei_hex()?;
        if let Some(to) = transfer.to.as_deref().and_then(|a| base58_to_hex(a).ok()) {
            tx.to = to;
        }
    }

    Ok((tx, raw))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub fee: i64,
    pub refund: i64,
    pub sent: i64,
    pub sent_to: i64,
    pub to: Option<String>,
}

/// Split the outputs of a transfer into refund and sent amounts, net of fee
pub(crate) fn apportion(raw: &RawTransactionResponse) -> RpcResult<Transfer> {
    let from = raw.vin.first().map(|v| v.address.as_str()).unwrap_or("");
    let value_in: i64 = raw.vin.iter().map(|v| v.value_sat).sum();

    let mut value_out = 0i64;
    let mut refund = 0i64;
    let mut sent = 0i64;
    let mut sent_to = 0i64;
    let mut to: Option<String> = None;

    for out in &raw.vout {
        value_out += out.value_sat;
        let address = out.script_pub_key.addresses.first().map(String::as_str);
        if address.is_some() && address == Some(from) {
            refund += out.value_sat;
            continue;
        }
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            let receiver = to.get_or_insert_with(|| address.to_string());
            if receiver == address {
                sent_to += out.value_sat;
            }
        }
        sent += out.value_sat;
    }

    let fee = value_in - value_out;
    if fee < 0 {
        return Err(RpcError::Internal(format!(
            "negative fee detected in transaction {}",
            raw.txid
        )));
    }

    if refund == 0 && sent == 0 {
        // entire transaction was burnt
    } else if refund == 0 {
        sent -= fee;
        sent_to -= fee;
    } else {
        refund -= fee;
    }

    Ok(Transfer {
        fee,
        refund,
        sent,
        sent_to,
        to,
    })
}

pub struct GetTransactionByHash {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetTransactionByHash {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionByHash"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let hash = string_param(&params, 0, "transaction hash")?;
        if strip_hex_prefix(hash).is_empty() {
            return Err(RpcError::InvalidParams("transaction hash is empty".into()));
        }
        let tx = resolve_transaction(&self.backend, hash).await?;
        serde_json::to_value(tx).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

/// Look up the `index`th transaction of a block
async fn transaction_at(backend: &Backend, block_hash: &str, index: u64) -> RpcResult<Value> {
    let block = match backend.get_block(block_hash).await {
        Ok(block) => block,
        Err(BackendError::InvalidAddress(_)) | Err(BackendError::EmptyResponse) => {
            return Ok(Value::Null)
        }
        Err(e) => return Err(e).with_context(|| format!("getblock {}", block_hash)),
    };
    let txid = match usize::try_from(index).ok().and_then(|i| block.tx.get(i)) {
        Some(txid) => txid.clone(),
        None => return Ok(Value::Null),
    };
    let tx = resolve_transaction(backend, &txid).await?;
    serde_json::to_value(tx).map_err(|e| RpcError::Internal(e.to_string()))
}

pub struct GetTransactionByBlockHashAndIndex {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetTransactionByBlockHashAndIndex {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionByBlockHashAndIndex"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 2)?;
        let hash = string_param(&params, 0, "block hash")?;
        let index = quantity_param(&params, 1, "transaction index")?;
        transaction_at(&self.backend, strip_hex_prefix(hash), index).await
    }
}

pub struct GetTransactionByBlockNumberAndIndex {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetTransactionByBlockNumberAndIndex {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionByBlockNumberAndIndex"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 2)?;
        let tag = BlockTag::parse(params.first(), false)?;
        let index = quantity_param(&params, 1, "transaction index")?;
        let number = tag.resolve(&self.backend).await?;
        let hash = match self.backend.get_block_hash(number).await {
            Ok(hash) => hash,
            Err(BackendError::InvalidParameter(_)) => return Ok(Value::Null),
            Err(e) => return Err(e).context("getblockhash"),
        };
        transaction_at(&self.backend, &hash, index).await
    }
}
