// rpc/src/transformers/network.rs

//! Node, network and chain-level queries.

use async_trait::async_trait;
use bridge_backend::Backend;
use bridge_codec::{decode_bytes, encode_big, encode_u64, keccak256, min_gas_price_wei};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Transformer;
use crate::{BackendContext, RequestContext, RpcError, RpcResult, SyncStatus};

pub const PROTOCOL_VERSION: &str = "0x41";

pub fn client_version() -> String {
    format!("eth-bridge/v{}/rust", env!("CARGO_PKG_VERSION"))
}

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(ClientVersion),
        Arc::new(Sha3),
        Arc::new(ChainId { backend: backend.clone(), method: "eth_chainId" }),
        Arc::new(ChainId { backend: backend.clone(), method: "net_version" }),
        Arc::new(Constant { method: "net_listening", value: json!(true) }),
        Arc::new(Constant { method: "eth_protocolVersion", value: json!(PROTOCOL_VERSION) }),
        Arc::new(Constant { method: "eth_getCompilers", value: json!([]) }),
        Arc::new(Constant { method: "eth_accounts", value: json!([]) }),
        Arc::new(Constant { method: "eth_getUncleByBlockHashAndIndex", value: Value::Null }),
        Arc::new(Constant { method: "eth_getUncleByBlockNumberAndIndex", value: Value::Null }),
        Arc::new(Constant { method: "eth_getUncleCountByBlockHash", value: json!("0x0") }),
        Arc::new(Constant { method: "eth_getUncleCountByBlockNumber", value: json!("0x0") }),
        Arc::new(PeerCount { backend: backend.clone() }),
        Arc::new(BlockNumber { backend: backend.clone() }),
        Arc::new(Syncing { backend: backend.clone() }),
        Arc::new(GasPrice),
        Arc::new(Mining { backend: backend.clone() }),
        Arc::new(Hashrate { backend: backend.clone() }),
    ]
}

/// Methods whose answer never depends on the backend
pub struct Constant {
    method: &'static str,
    value: Value,
}

#[async_trait]
impl Transformer for Constant {
    fn method_name(&self) -> &'static str {
        self.method
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        Ok(self.value.clone())
    }
}

pub struct ClientVersion;

#[async_trait]
impl Transformer for ClientVersion {
    fn method_name(&self) -> &'static str {
        "web3_clientVersion"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        Ok(json!(client_version()))
    }
}

pub struct Sha3;

#[async_trait]
impl Transformer for Sha3 {
    fn method_name(&self) -> &'static str {
        "web3_sha3"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        if params.len() != 1 {
            return Err(RpcError::InvalidParams("require 1 argument: the data to hash".into()));
        }
        let data = params[0]
            .as_str()
            .ok_or_else(|| RpcError::InvalidParams("data must be a hex string".into()))?;
        let bytes = decode_bytes(data)?;
        Ok(json!(keccak256(&bytes).to_prefixed_hex()))
    }
}

/// `eth_chainId` and `net_version` both report the chain id as hex
pub struct ChainId {
    backend: Backend,
    method: &'static str,
}

#[async_trait]
impl Transformer for ChainId {
    fn method_name(&self) -> &'static str {
        self.method
    }

    async fn handle(&self, ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let chain = self.backend.chain(&ctx.cancel).await.context("chain detection")?;
        Ok(json!(encode_u64(chain.chain_id())))
    }
}

pub struct PeerCount {
    backend: Backend,
}

#[async_trait]
impl Transformer for PeerCount {
    fn method_name(&self) -> &'static str {
        "net_peerCount"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let peers = self.backend.get_peer_info().await.context("getpeerinfo")?;
        Ok(json!(encode_u64(peers.len() as u64)))
    }
}

pub struct BlockNumber {
    backend: Backend,
}

#[async_trait]
impl Transformer for BlockNumber {
    fn method_name(&self) -> &'static str {
        "eth_blockNumber"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let count = self.backend.get_block_count().await.context("getblockcount")?;
        Ok(json!(encode_u64(count)))
    }
}

pub struct Syncing {
    backend: Backend,
}

#[async_trait]
impl Transformer for Syncing {
    fn method_name(&self) -> &'static str {
        "eth_syncing"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let info = self.backend.get_blockchain_info().await.context("getblockchaininfo")?;
        if info.blocks >= info.headers {
            return Ok(json!(false));
        }
        let status = SyncStatus {
            starting_block: encode_u64(0),
            current_block: encode_u64(info.blocks),
            highest_block: encode_u64(info.headers),
        };
        serde_json::to_value(status).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

pub struct GasPrice;

#[async_trait]
impl Transformer for GasPrice {
    fn method_name(&self) -> &'static str {
        "eth_gasPrice"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        Ok(json!(encode_big(&min_gas_price_wei())))
    }
}

pub struct Mining {
    backend: Backend,
}

#[async_trait]
impl Transformer for Mining {
    fn method_name(&self) -> &'static str {
        "eth_mining"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let info = self.backend.get_staking_info().await.context("getstakinginfo")?;
        Ok(json!(info.staking))
    }
}

pub struct Hashrate {
    backend: Backend,
}

#[async_trait]
impl Transformer for Hashrate {
    fn method_name(&self) -> &'static str {
        "eth_hashrate"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let info = self.backend.get_mining_info().await.context("getmininginfo")?;
        let rate = if info.network_hash_ps.is_finite() && info.network_hash_ps > 0.0 {
            info.network_hash_ps.floor() as u64
        } else {
            0
        };
        Ok(json!(encode_u64(rate)))
    }
}
