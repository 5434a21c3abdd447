// rpc/src/transformers/call.rs

use async_trait::async_trait;
use bridge_backend::types::{CallContractRequest, CallContractResponse};
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, encode_u64, is_eth_hex_address, strip_hex_prefix};
use serde_json::{json, Value};
use std::sync::Arc;

use super::receipt::NON_CONTRACT_VM_GAS;
use super::Transformer;
use crate::params::TransactionRequest;
use crate::{RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(Call { backend: backend.clone() }),
        Arc::new(EstimateGas { backend: backend.clone() }),
    ]
}

/// Build a `callcontract` request; hex senders are resolved through the wallet
async fn call_request(
    backend: &Backend,
    tx: &TransactionRequest,
    with_gas: bool,
) -> RpcResult<CallContractRequest> {
    let from = match tx.from() {
        Some(from) if is_eth_hex_address(from) => Some(
            backend
                .from_hex_address(strip_hex_prefix(from))
                .await
                .map_err(|e| RpcError::Callback(e.to_string()))?,
        ),
        Some(from) => Some(from.to_string()),
        None => None,
    };
    let gas_limit = match (&tx.gas, with_gas) {
        (Some(gas), true) if !gas.is_empty() => Some(tx.gas_limit()?),
        _ => None,
    };
    Ok(CallContractRequest {
        to: strip_hex_prefix(tx.to().unwrap_or_default()).to_string(),
        data: strip_hex_prefix(tx.data().unwrap_or_default()).to_string(),
        from,
        gas_limit,
    })
}

pub struct Call {
    backend: Backend,
}

impl Call {
    fn to_response(resp: &CallContractResponse) -> RpcResult<Value> {
        if resp.execution_result.output.is_empty() {
            return Err(RpcError::Callback(
                "Revert: executionResult output is empty".into(),
            ));
        }
        Ok(json!(add_hex_prefix(&resp.execution_result.output)))
    }
}

#[async_trait]
impl Transformer for Call {
    fn method_name(&self) -> &'static str {
        "eth_call"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let tx = TransactionRequest::from_params(&params)?;
        let req = call_request(&self.backend, &tx, true).await?;
        match self.backend.call_contract(&req).await {
            Ok(resp) => Self::to_response(&resp),
            // no contract at that address
            Err(BackendError::InvalidAddress(_)) => Ok(json!("0x")),
            Err(e) => Err(RpcError::Callback(e.to_string())),
        }
    }
}

pub struct EstimateGas {
    backend: Backend,
}

#[async_trait]
impl Transformer for EstimateGas {
    fn method_name(&self) -> &'static str {
        "eth_estimateGas"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let tx = TransactionRequest::from_params(&params)?;
        if tx.data().is_none() {
            return Ok(json!(NON_CONTRACT_VM_GAS));
        }

        // a supplied limit would make the backend report it back as OutOfGas
        // instead of measuring the actual usage
        let req = call_request(&self.backend, &tx, false).await?;
        let resp = self
            .backend
            .call_contract(&req)
            .await
            .map_err(|e| RpcError::Callback(e.to_string()))?;

        if resp.execution_result.excepted != "None" {
            tracing::debug!(
                excepted = %resp.execution_result.excepted,
                message = %resp.execution_result.excepted_message,
                "Gas estimation reverted"
            );
            return Err(RpcError::Callback("execution reverted".into()));
        }
        Ok(json!(encode_u64(resp.execution_result.gas_used)))
    }
}
