// rpc/src/transformers/mod.rs

//! One transformer per Ethereum method.
//!
//! A transformer validates its positional params, issues the backend calls it
//! needs through the `Backend` facade and assembles the Ethereum-shaped result.

pub mod block;
pub mod call;
pub mod dev;
pub mod filters;
pub mod logs;
pub mod network;
pub mod receipt;
pub mod send;
pub mod state;
pub mod subscribe;
pub mod transaction;
pub mod utxo;

use async_trait::async_trait;
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, decode_address};
use serde_json::Value;
use std::sync::Arc;

use crate::{BackendContext, FilterRegistry, RequestContext, RpcError, RpcResult};

#[async_trait]
pub trait Transformer: Send + Sync {
    fn method_name(&self) -> &'static str;

    /// `params` is the already unpacked positional array
    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value>;
}

/// Every transformer, wired to the shared backend and filter registry
pub fn all(backend: &Backend, filters: &Arc<FilterRegistry>) -> Vec<Arc<dyn Transformer>> {
    let mut list: Vec<Arc<dyn Transformer>> = Vec::new();
    list.extend(network::transformers(backend));
    list.extend(block::transformers(backend));
    list.extend(transaction::transformers(backend));
    list.extend(receipt::transformers(backend));
    list.extend(state::transformers(backend));
    list.extend(send::transformers(backend));
    list.extend(call::transformers(backend));
    list.extend(logs::transformers(backend));
    list.extend(filters::transformers(backend, filters));
    list.extend(subscribe::transformers());
    list.extend(utxo::transformers(backend));
    list.extend(dev::transformers(backend));
    list
}

/// Height of the block with the given (unprefixed) hash
pub(crate) async fn block_number_by_hash(backend: &Backend, hash: &str) -> RpcResult<u64> {
    let block = backend
        .get_block(hash)
        .await
        .with_context(|| format!("getblock {}", hash))?;
    Ok(block.height)
}

/// Base58 backend address to `0x` hex, decoded locally
pub(crate) fn base58_to_hex(base58: &str) -> RpcResult<String> {
    Ok(decode_address(base58)?.to_prefixed_hex())
}

/// `0x`-prefix a backend hex value, keeping empty values empty
pub(crate) fn prefixed_or_empty(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        add_hex_prefix(value)
    }
}

/// True when the backend reported an unknown address, transaction or block
pub(crate) fn is_not_found(err: &RpcError) -> bool {
    matches!(
        err.backend_source(),
        Some(BackendError::InvalidAddress(_)) | Some(BackendError::EmptyResponse)
    )
}
