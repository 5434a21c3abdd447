// rpc/src/transformers/block.rs

use async_trait::async_trait;
use bridge_backend::types::BlockResponse;
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, encode_u64, strip_hex_prefix};
use serde_json::Value;
use std::sync::Arc;

use super::transaction::resolve_transaction;
use super::Transformer;
use crate::params::{bool_param, expect_len, string_param, BlockTag};
use crate::types::{
    Block, BlockTransactions, NewHead, DEFAULT_BLOCK_GAS_LIMIT, DEFAULT_SHA3_UNCLES,
    EMPTY_BLOCK_NONCE, EMPTY_EXTRA_DATA, EMPTY_LOGS_BLOOM, ZERO_ADDRESS,
};
use crate::{BackendContext, RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(GetBlockByNumber { backend: backend.clone() }),
        Arc::new(GetBlockByHash { backend: backend.clone() }),
    ]
}

fn difficulty(block: &BlockResponse) -> String {
    let d = if block.difficulty.is_finite() && block.difficulty > 0.0 {
        block.difficulty.floor() as u64
    } else {
        0
    };
    encode_u64(d)
}

/// Header fields of a block as a `newHeads` payload
pub fn new_head(block: &BlockResponse) -> NewHead {
    NewHead {
        difficulty: difficulty(block),
        extra_data: EMPTY_EXTRA_DATA.to_string(),
        gas_limit: DEFAULT_BLOCK_GAS_LIMIT.to_string(),
        gas_used: "0x0".to_string(),
        logs_bloom: EMPTY_LOGS_BLOOM.to_string(),
        miner: ZERO_ADDRESS.to_string(),
        nonce: EMPTY_BLOCK_NONCE.to_string(),
        number: encode_u64(block.height),
        parent_hash: add_hex_prefix(&block.previous_block_hash),
        receipt_root: add_hex_prefix(&block.merkle_root),
        sha3_uncles: DEFAULT_SHA3_UNCLES.to_string(),
        state_root: add_hex_prefix(&block.hash_state_root),
        timestamp: encode_u64(block.time),
        transactions_root: add_hex_prefix(&block.merkle_root),
        hash: add_hex_prefix(&block.hash),
    }
}

/// Map a backend block; with `full` every transaction is resolved
pub async fn build_block(backend: &Backend, block: BlockResponse, full: bool) -> RpcResult<Block> {
    let transactions = if full {
        let mut records = Vec::with_capacity(block.tx.len());
        for txid in &block.tx {
            match resolve_transaction(backend, txid).await {
                Ok(Some(tx)) => records.push(tx),
                Ok(None) if backend.ignore_unknown_transactions() => {
                    tracing::debug!(txid = %txid, "Skipping unknown transaction in block");
                }
                Ok(None) => {
                    return Err(RpcError::Callback(format!("couldn't find transaction {}", txid)))
                }
                Err(e) if backend.ignore_unknown_transactions() => {
                    tracing::warn!(txid = %txid, error = %e, "Skipping unresolvable transaction in block");
                }
                Err(e) => return Err(e),
            }
        }
        BlockTransactions::Full(records)
    } else {
        BlockTransactions::Hashes(block.tx.iter().map(|h| add_hex_prefix(h)).collect())
    };

    let difficulty = difficulty(&block);
    Ok(Block {
        number: encode_u64(block.height),
        hash: add_hex_prefix(&block.hash),
        parent_hash: add_hex_prefix(&block.previous_block_hash),
        nonce: EMPTY_BLOCK_NONCE.to_string(),
        sha3_uncles: DEFAULT_SHA3_UNCLES.to_string(),
        logs_bloom: EMPTY_LOGS_BLOOM.to_string(),
        transactions_root: add_hex_prefix(&block.merkle_root),
        state_root: add_hex_prefix(&block.hash_state_root),
        receipts_root: add_hex_prefix(&block.merkle_root),
        miner: ZERO_ADDRESS.to_string(),
        total_difficulty: difficulty.clone(),
        difficulty,
        extra_data: EMPTY_EXTRA_DATA.to_string(),
        size: encode_u64(block.size),
        gas_limit: DEFAULT_BLOCK_GAS_LIMIT.to_string(),
        gas_used: "0x0".to_string(),
        timestamp: encode_u64(block.time),
        transactions,
        uncles: Vec::new(),
    })
}

async fn block_by_hash(backend: &Backend, hash: &str, full: bool) -> RpcResult<Value> {
    let block = match backend.get_block(hash).await {
        Ok(block) => block,
        Err(BackendError::InvalidAddress(_)) | Err(BackendError::EmptyResponse) => {
            return Ok(Value::Null)
        }
        Err(e) => return Err(e).with_context(|| format!("getblock {}", hash)),
    };
    let block = build_block(backend, block, full).await?;
    serde_json::to_value(block).map_err(|e| RpcError::Internal(e.to_string()))
}

pub struct GetBlockByNumber {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetBlockByNumber {
    fn method_name(&self) -> &'static str {
        "eth_getBlockByNumber"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let tag = BlockTag::parse(params.first(), false)?;
        let full = bool_param(&params, 1)?;
        let number = tag.resolve(&self.backend).await?;
        let hash = match self.backend.get_block_hash(number).await {
            Ok(hash) => hash,
            // height out of range
            Err(BackendError::InvalidParameter(_)) => return Ok(Value::Null),
            Err(e) => return Err(e).with_context(|| format!("getblockhash {}", number)),
        };
        block_by_hash(&self.backend, &hash, full).await
    }
}

pub struct GetBlockByHash {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetBlockByHash {
    fn method_name(&self) -> &'static str {
        "eth_getBlockByHash"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let hash = string_param(&params, 0, "block hash")?;
        let full = bool_param(&params, 1)?;
        block_by_hash(&self.backend, strip_hex_prefix(hash), full).await
    }
}
