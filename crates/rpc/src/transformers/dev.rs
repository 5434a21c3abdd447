// rpc/src/transformers/dev.rs

//! Developer helpers passed through to the backend wallet.

use async_trait::async_trait;
use bridge_backend::Backend;
use bridge_codec::strip_hex_prefix;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Transformer;
use crate::{RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(StringPassThrough {
            backend: backend.clone(),
            method: "dev_gethexaddress",
            backend_method: "gethexaddress",
        }),
        Arc::new(StringPassThrough {
            backend: backend.clone(),
            method: "dev_fromhexaddress",
            backend_method: "fromhexaddress",
        }),
        Arc::new(GenerateToAddress { backend: backend.clone() }),
    ]
}

/// One string argument in, the backend's string answer out
pub struct StringPassThrough {
    backend: Backend,
    method: &'static str,
    backend_method: &'static str,
}

#[async_trait]
impl Transformer for StringPassThrough {
    fn method_name(&self) -> &'static str {
        self.method
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let arg = match params.as_slice() {
            [Value::String(arg)] => arg.clone(),
            [_] => {
                return Err(RpcError::InvalidParams(
                    "couldn't unmarshal request parameters".into(),
                ))
            }
            _ => {
                return Err(RpcError::InvalidParams(
                    "require 1 argument: the base58 address".into(),
                ))
            }
        };
        let result = match self.backend_method {
            "gethexaddress" => self.backend.get_hex_address(&arg).await,
            _ => self.backend.from_hex_address(&arg).await,
        };
        result
            .map(|s| json!(s))
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))
    }
}

pub struct GenerateToAddress {
    backend: Backend,
}

fn parse_blocks(value: &Value) -> RpcResult<i64> {
    match value {
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| RpcError::InvalidParams("Couldn't parse blocks".into())),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| RpcError::InvalidParams("Couldn't parse blocks".into())),
        other => Err(RpcError::InvalidParams(format!("Unknown blocks type: {}", other))),
    }
}

#[async_trait]
impl Transformer for GenerateToAddress {
    fn method_name(&self) -> &'static str {
        "dev_generatetoaddress"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        if !self.backend.can_generate(&ctx.cancel).await {
            return Err(RpcError::InvalidRequest("Can only generate on regtest".into()));
        }
        let (blocks, target) = match params.as_slice() {
            [blocks, target] => (blocks, target),
            _ => {
                return Err(RpcError::InvalidParams(
                    "require 2 arguments: blocks, the base58/hex address to mine rewards to".into(),
                ))
            }
        };
        let target = target
            .as_str()
            .ok_or_else(|| RpcError::InvalidParams("second parameter must be string".into()))?;
        let blocks = parse_blocks(blocks)?;
        if blocks <= 0 {
            return Err(RpcError::InvalidParams("Blocks to generate must be > 0".into()));
        }

        let address = match self.backend.from_hex_address(strip_hex_prefix(target)).await {
            Ok(address) => address,
            // already base58
            Err(_) => target.to_string(),
        };
        let hashes = self
            .backend
            .generate_to_address(blocks as u64, &address)
            .await
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        Ok(json!(hashes))
    }
}
