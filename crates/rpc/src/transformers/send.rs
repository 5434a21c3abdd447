// rpc/src/transformers/send.rs

use async_trait::async_trait;
use bridge_backend::types::{CreateContractRequest, SendToAddressRequest, SendToContractRequest};
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, is_eth_hex_address, strip_hex_prefix};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Transformer;
use crate::params::{expect_len, string_param, TransactionRequest};
use crate::{BackendContext, RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(SendTransaction { backend: backend.clone() }),
        Arc::new(SendRawTransaction { backend: backend.clone() }),
    ]
}

/// Hex addresses go through the wallet's `fromhexaddress`; anything else is
/// assumed to already be in base58 form
async fn wallet_address(backend: &Backend, address: &str) -> RpcResult<String> {
    if !is_eth_hex_address(address) {
        return Ok(address.to_string());
    }
    backend
        .from_hex_address(strip_hex_prefix(address))
        .await
        .with_context(|| format!("fromhexaddress {}", address))
}

async fn optional_sender(backend: &Backend, from: Option<&str>) -> RpcResult<Option<String>> {
    match from {
        Some(from) => Ok(Some(wallet_address(backend, from).await?)),
        None => Ok(None),
    }
}

pub struct SendTransaction {
    backend: Backend,
}

impl SendTransaction {
    async fn create_contract(&self, tx: &TransactionRequest) -> RpcResult<String> {
        let req = CreateContractRequest {
            bytecode: strip_hex_prefix(tx.data().unwrap_or_default()).to_string(),
            gas_limit: tx.gas_limit()?,
            gas_price: tx.gas_price()?,
            sender: optional_sender(&self.backend, tx.from()).await?,
        };
        let resp = self
            .backend
            .create_contract(&req)
            .await
            .context("createcontract")?;
        Ok(resp.txid)
    }

    async fn call_contract(&self, tx: &TransactionRequest) -> RpcResult<String> {
        let req = SendToContractRequest {
            contract: strip_hex_prefix(tx.to().unwrap_or_default()).to_string(),
            data: strip_hex_prefix(tx.data().unwrap_or_default()).to_string(),
            amount: tx.amount()?,
            gas_limit: tx.gas_limit()?,
            gas_price: tx.gas_price()?,
            sender: optional_sender(&self.backend, tx.from()).await?,
        };
        let resp = self
            .backend
            .send_to_contract(&req)
            .await
            .context("sendtocontract")?;
        Ok(resp.txid)
    }

    async fn send_value(&self, tx: &TransactionRequest) -> RpcResult<String> {
        let to = wallet_address(&self.backend, tx.to().unwrap_or_default()).await?;
        let req = SendToAddressRequest {
            to,
            amount: tx.amount()?,
            sender: optional_sender(&self.backend, tx.from()).await?,
        };
        self.backend
            .send_to_address(&req)
            .await
            .context("sendtoaddress")
    }
}

#[async_trait]
impl Transformer for SendTransaction {
    fn method_name(&self) -> &'static str {
        "eth_sendTransaction"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let tx = TransactionRequest::from_params(&params)?;
        // validate numeric fields before touching the backend
        tx.gas_limit()?;
        tx.gas_price()?;
        tx.amount()?;

        let txid = if tx.is_create_contract() {
            self.create_contract(&tx).await?
        } else if tx.is_send_ether() {
            self.send_value(&tx).await?
        } else if tx.is_call_contract() {
            self.call_contract(&tx).await?
        } else {
            return Err(RpcError::InvalidParams("Unknown operation".into()));
        };

        self.backend.generate_if_possible(&ctx.cancel).await;
        Ok(json!(add_hex_prefix(&txid)))
    }
}

pub struct SendRawTransaction {
    backend: Backend,
}

#[async_trait]
impl Transformer for SendRawTransaction {
    fn method_name(&self) -> &'static str {
        "eth_sendRawTransaction"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let raw = strip_hex_prefix(string_param(&params, 0, "raw transaction")?).to_string();
        if raw.is_empty() {
            return Err(RpcError::InvalidParams(
                "invalid parameter: raw transaction hexed string is empty".into(),
            ));
        }

        let txid = match self.backend.send_raw_transaction(&raw).await {
            Ok(txid) => {
                self.backend.generate_if_possible(&ctx.cancel).await;
                txid
            }
            Err(BackendError::AlreadyInChain(_)) => {
                // already committed: answer with its hash
                let decoded = self.backend.decode_raw_transaction(&raw).await.map_err(|e| {
                    tracing::error!(error = %e, "Error decoding raw transaction for duplicate raw transaction");
                    RpcError::Callback(e.to_string())
                })?;
                decoded.hash
            }
            Err(e) => return Err(RpcError::Callback(e.to_string())),
        };
        Ok(json!(add_hex_prefix(&txid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::test_support::{backend, backend_on, ctx};
    use bridge_backend::{MockBackend, Network};

    const FROM: &str = "0x1e6f89d7399081b4f8f8aa1ae2805a5efff2f960";
    const CONTRACT: &str = "0xaf1ae4e29253ba755c723bca25e883b8deb777b8";
    const TXID: &str = "6b7b7f3a1f0e3bd1a1cd0b2f77a4e5b4ba0a2c1c85d3a4ba22c1e0bb3a6c0a2d";

    #[tokio::test]
    async fn test_call_contract_transaction() {
        let mock = Arc::new(MockBackend::new());
        mock.push("fromhexaddress", json!("qUbxboqjBRp96j3La8D1RYkyqx5uQbJPoW"));
        mock.push("sendtocontract", json!({"txid": TXID, "sender": "q", "hash160": "h"}));
        let t = SendTransaction { backend: backend_on(&mock, Network::Test) };
        let out = t
            .handle(
                &ctx(),
                vec![json!({
                    "from": FROM,
                    "to": CONTRACT,
                    "gas": "0x6691b7",
                    "gasPrice": "0x9502f9000",
                    "data": "0xa9059cbb"
                })],
            )
            .await
            .unwrap();
        assert_eq!(out, json!(format!("0x{}", TXID)));
        assert_eq!(
            mock.params("sendtocontract"),
            vec![json!([
                "af1ae4e29253ba755c723bca25e883b8deb777b8",
                "a9059cbb",
                "0",
                6721975,
                "0.0000004",
                "qUbxboqjBRp96j3La8D1RYkyqx5uQbJPoW"
            ])]
        );
        // not regtest: nothing mined
        assert_eq!(mock.calls("generatetoaddress"), 0);
    }

    #[tokio::test]
    async fn test_send_value_mines_on_regtest() {
        let mock = Arc::new(MockBackend::new());
        mock.push("fromhexaddress", json!("qLn9vqbr2Gx3TsVR9QyTVB5mrMoh4x9xfG"));
        mock.push("sendtoaddress", json!(TXID));
        mock.push("getnewaddress", json!("qLn9vqbr2Gx3TsVR9QyTVB5mrMoh4x9xfG"));
        mock.push("generatetoaddress", json!(["00"]));
        let t = SendTransaction { backend: backend(&mock) };
        let out = t
            .handle(&ctx(), vec![json!({"to": CONTRACT, "value": "0xde0b6b3a7640000"})])
            .await
            .unwrap();
        assert_eq!(out, json!(format!("0x{}", TXID)));
        assert_eq!(
            mock.params("sendtoaddress"),
            vec![json!(["qLn9vqbr2Gx3TsVR9QyTVB5mrMoh4x9xfG", "1"])]
        );
        assert_eq!(mock.calls("generatetoaddress"), 1);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let mock = Arc::new(MockBackend::new());
        let t = SendTransaction { backend: backend(&mock) };
        let err = t.handle(&ctx(), vec![json!({"from": FROM})]).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown operation");
        assert_eq!(err.code(), -32602);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_contract() {
        let mock = Arc::new(MockBackend::new());
        mock.push(
            "createcontract",
            json!({"txid": TXID, "sender": "q", "hash160": "h", "address": "c"}),
        );
        let t = SendTransaction { backend: backend_on(&mock, Network::Main) };
        t.handle(&ctx(), vec![json!({"data": "0x6060"})]).await.unwrap();
        assert_eq!(
            mock.params("createcontract"),
            vec![json!(["6060", 250000, "0.0000004"])]
        );
    }

    #[tokio::test]
    async fn test_raw_transaction_already_in_chain() {
        let mock = Arc::new(MockBackend::new());
        mock.push_error("sendrawtransaction", BackendError::AlreadyInChain("known".into()));
        mock.push("decoderawtransaction", json!({"txid": TXID, "hash": TXID}));
        let t = SendRawTransaction { backend: backend(&mock) };
        let out = t.handle(&ctx(), vec![json!("0x0200")]).await.unwrap();
        assert_eq!(out, json!(format!("0x{}", TXID)));
        assert_eq!(mock.calls("generatetoaddress"), 0);
    }

    #[tokio::test]
    async fn test_raw_transaction_empty() {
        let mock = Arc::new(MockBackend::new());
        let t = SendRawTransaction { backend: backend(&mock) };
        let err = t.handle(&ctx(), vec![json!("0x")]).await.unwrap_err();
        assert_eq!(err.code(), -32602);
    }
}
