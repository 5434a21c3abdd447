// rpc/src/transformers/receipt.rs

use async_trait::async_trait;
use bridge_backend::types::TransactionReceipt;
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, encode_u64, strip_hex_prefix};
use serde_json::Value;
use std::sync::Arc;

use super::logs::to_eth_log;
use super::transaction::reward_transaction;
use super::{is_not_found, prefixed_or_empty, Transformer};
use crate::params::{expect_len, string_param};
use crate::{BackendContext, Receipt, RequestContext, RpcError, RpcResult, EMPTY_LOGS_BLOOM};

/// Gas reported for transactions that never touched the VM
pub const NON_CONTRACT_VM_GAS: &str = "0x55f0";

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![Arc::new(GetTransactionReceipt { backend: backend.clone() })]
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Fold the per-output receipts of one transaction into a single receipt
pub fn merge_receipts(receipts: &[TransactionReceipt]) -> Option<Receipt> {
    let first = receipts.first()?;
    let gas_used: u64 = receipts.iter().map(|r| r.gas_used).sum();
    let cumulative: u64 = receipts.iter().map(|r| r.cumulative_gas_used).sum();
    let succeeded = receipts.iter().all(|r| r.excepted == "None");

    let mut logs = Vec::new();
    for receipt in receipts {
        for i in 0..receipt.log.len() {
            if let Some(mut log) = to_eth_log(receipt, i) {
                log.log_index = encode_u64(logs.len() as u64);
                logs.push(log);
            }
        }
    }

    Some(Receipt {
        transaction_hash: add_hex_prefix(&first.transaction_hash),
        transaction_index: encode_u64(first.transaction_index),
        block_hash: add_hex_prefix(&first.block_hash),
        block_number: encode_u64(first.block_number),
        from: non_empty(prefixed_or_empty(&first.from)),
        to: non_empty(prefixed_or_empty(&first.to)),
        cumulative_gas_used: encode_u64(cumulative),
        effective_gas_price: "0x0".into(),
        gas_used: encode_u64(gas_used),
        contract_address: non_empty(prefixed_or_empty(&first.contract_address)),
        logs,
        logs_bloom: EMPTY_LOGS_BLOOM.to_string(),
        status: if succeeded { "0x1" } else { "0x0" }.to_string(),
    })
}

pub struct GetTransactionReceipt {
    backend: Backend,
}

impl GetTransactionReceipt {
    /// Receipt of a transaction that carries no VM execution
    async fn reward_receipt(&self, txid: &str) -> RpcResult<Value> {
        let tx = match reward_transaction(&self.backend, txid).await {
            Ok((tx, _)) => tx,
            Err(e) if is_not_found(&e) => return Ok(Value::Null),
            Err(e) => return Err(RpcError::Callback(e.to_string())),
        };
        let receipt = Receipt {
            transaction_hash: tx.hash,
            transaction_index: tx.transaction_index.unwrap_or_default(),
            block_hash: tx.block_hash.unwrap_or_default(),
            block_number: tx.block_number.unwrap_or_default(),
            from: non_empty(tx.from),
            to: non_empty(tx.to),
            cumulative_gas_used: NON_CONTRACT_VM_GAS.into(),
            effective_gas_price: "0x0".into(),
            gas_used: NON_CONTRACT_VM_GAS.into(),
            contract_address: None,
            logs: Vec::new(),
            logs_bloom: EMPTY_LOGS_BLOOM.to_string(),
            status: "0x1".into(),
        };
        serde_json::to_value(receipt).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

#[async_trait]
impl Transformer for GetTransactionReceipt {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionReceipt"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let txid = strip_hex_prefix(string_param(&params, 0, "transaction hash")?).to_string();
        if txid.is_empty() {
            return Err(RpcError::InvalidParams("transaction hash is empty".into()));
        }

        let receipts = match self
            .backend
            .get_transaction_receipt(&txid)
            .await
            .with_context(|| format!("gettransactionreceipt {}", txid))
        {
            Ok(receipts) if !receipts.is_empty() => receipts,
            Ok(_) => return self.reward_receipt(&txid).await,
            Err(e) if is_not_found(&e) => {
                tracing::debug!(txid = %txid, error = %e, "No contract receipt, trying reward lookup");
                return self.reward_receipt(&txid).await;
            }
            Err(e) => return Err(e),
        };

        let mut receipt = match merge_receipts(&receipts) {
            Some(receipt) => receipt,
            None => return Ok(Value::Null),
        };

        let raw = self
            .backend
            .get_raw_transaction(&txid)
            .await
            .with_context(|| format!("getrawtransaction {}", txid))?;
        let decoded = match self.backend.decode_raw_transaction(&raw.hex).await {
            Ok(decoded) => decoded,
            Err(BackendError::EmptyResponse) => return Ok(Value::Null),
            Err(e) => return Err(e).context("decoderawtransaction"),
        };
        if decoded.is_contract_creation() {
            receipt.to = None;
        } else {
            receipt.contract_address = None;
        }

        serde_json::to_value(receipt).map_err(|e| RpcError::Internal(e.to_string()))
    }
}
