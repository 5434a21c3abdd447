// rpc/src/transformers/state.rs

//! Account-model views over the backend: balance, code, storage, nonce.

use async_trait::async_trait;
use bridge_backend::types::StorageResponse;
use bridge_backend::{Backend, BackendError};
use bridge_codec::{add_hex_prefix, strip_hex_prefix, HexAddress, NativeAmount};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Transformer;
use crate::params::{expect_len, string_param, BlockTag};
use crate::{BackendContext, RequestContext, RpcResult};

/// Value of a storage slot that was never written
pub const EMPTY_STORAGE_SLOT: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(GetBalance { backend: backend.clone() }),
        Arc::new(GetCode { backend: backend.clone() }),
        Arc::new(GetStorageAt { backend: backend.clone() }),
        Arc::new(GetTransactionCount),
    ]
}

pub struct GetBalance {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetBalance {
    fn method_name(&self) -> &'static str {
        "eth_getBalance"
    }

    async fn handle(&self, ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let address = HexAddress::from_hex(string_param(&params, 0, "address")?)?;

        // contracts hold an account balance
        let satoshis = match self.backend.get_account_info(&address.to_hex()).await {
            Ok(info) => info.balance,
            Err(BackendError::InvalidAddress(_)) => {
                let base58 = self
                    .backend
                    .to_base58(&address, &ctx.cancel)
                    .await
                    .context("address conversion")?;
                self.backend
                    .get_address_balance(&base58)
                    .await
                    .with_context(|| format!("getaddressbalance {}", base58))?
                    .balance
            }
            Err(e) => return Err(e).with_context(|| format!("getaccountinfo {}", address)),
        };

        Ok(json!(NativeAmount::from_satoshis(satoshis).to_wei_hex()?))
    }
}

pub struct GetCode {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetCode {
    fn method_name(&self) -> &'static str {
        "eth_getCode"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 1)?;
        let address = strip_hex_prefix(string_param(&params, 0, "address")?);
        match self.backend.get_account_info(address).await {
            Ok(info) => Ok(json!(add_hex_prefix(&info.code))),
            Err(BackendError::InvalidAddress(_)) => Ok(json!("0x")),
            Err(e) => Err(e).with_context(|| format!("getaccountinfo {}", address)),
        }
    }
}

/// Find a slot in the nested `getstorage` result.
///
/// The backend keys slots by their 32-byte hex form; a short index is also
/// tried verbatim.
pub fn storage_value(storage: &StorageResponse, index: &str) -> String {
    let short = strip_hex_prefix(index).to_lowercase();
    let padded = format!("{:0>64}", short);
    for slots in storage.values() {
        if let Some(value) = slots.get(&short).or_else(|| slots.get(&padded)) {
            return add_hex_prefix(value);
        }
    }
    EMPTY_STORAGE_SLOT.to_string()
}

pub struct GetStorageAt {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetStorageAt {
    fn method_name(&self) -> &'static str {
        "eth_getStorageAt"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        expect_len(&params, 2)?;
        let address = strip_hex_prefix(string_param(&params, 0, "address")?).to_string();
        let index = string_param(&params, 1, "storage index")?.to_string();
        let tag = BlockTag::parse(params.get(2), false)?;
        let block = tag.resolve(&self.backend).await?;

        let storage = self
            .backend
            .get_storage(&address, Some(block))
            .await
            .with_context(|| format!("getstorage {}", address))?;
        Ok(json!(storage_value(&storage, &index)))
    }
}

/// The backend has no account nonces
pub struct GetTransactionCount;

#[async_trait]
impl Transformer for GetTransactionCount {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionCount"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        Ok(json!("0x1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::test_support::{backend, ctx};
    use bridge_backend::MockBackend;
    use bridge_codec::{encode_address, Chain};

    const ADDRESS: &str = "0x1e6f89d7399081b4f8f8aa1ae2805a5efff2f960";

    #[tokio::test]
    async fn test_contract_balance() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getaccountinfo", json!({"address": "1e6f", "balance": 100000000, "code": ""}));
        let t = GetBalance { backend: backend(&mock) };
        let out = t.handle(&ctx(), vec![json!(ADDRESS), json!("latest")]).await.unwrap();
        assert_eq!(out, json!("0xde0b6b3a7640000"));
        assert_eq!(mock.calls("getaddressbalance"), 0);
    }

    #[tokio::test]
    async fn test_plain_address_balance() {
        let mock = Arc::new(MockBackend::new());
        mock.push_error("getaccountinfo", BackendError::InvalidAddress("not a contract".into()));
        mock.push("getaddressbalance", json!({"balance": 1, "received": 1, "immature": 0}));
        let t = GetBalance { backend: backend(&mock) };
        let out = t.handle(&ctx(), vec![json!(ADDRESS)]).await.unwrap();
        assert_eq!(out, json!("0x2540be400"));

        let hex = HexAddress::from_hex(ADDRESS).unwrap();
        let base58 = encode_address(&hex, Chain::RegTest);
        assert_eq!(
            mock.params("getaddressbalance"),
            vec![json!([{"addresses": [base58]}])]
        );
    }

    #[tokio::test]
    async fn test_bad_address_rejected_before_backend() {
        let mock = Arc::new(MockBackend::new());
        let t = GetBalance { backend: backend(&mock) };
        let err = t.handle(&ctx(), vec![json!("0x1234")]).await.unwrap_err();
        assert_eq!(err.code(), -32602);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_code() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getaccountinfo", json!({"address": "1e6f", "balance": 0, "code": "6060"}));
        mock.push_error("getaccountinfo", BackendError::InvalidAddress("x".into()));
        let t = GetCode { backend: backend(&mock) };
        assert_eq!(t.handle(&ctx(), vec![json!(ADDRESS)]).await.unwrap(), json!("0x6060"));
        assert_eq!(t.handle(&ctx(), vec![json!(ADDRESS)]).await.unwrap(), json!("0x"));
    }

    #[tokio::test]
    async fn test_storage_at() {
        let slot = "0000000000000000000000000000000000000000000000000000000000000002";
        let mock = Arc::new(MockBackend::new());
        mock.push(
            "getstorage",
            json!({"abcd": {slot: "00000000000000000000000000000000000000000000000000000000000003e8"}}),
        );
        let t = GetStorageAt { backend: backend(&mock) };
        let out = t
            .handle(&ctx(), vec![json!(ADDRESS), json!("0x2"), json!("0x10")])
            .await
            .unwrap();
        assert_eq!(
            out,
            json!("0x00000000000000000000000000000000000000000000000000000000000003e8")
        );
        assert_eq!(
            mock.params("getstorage"),
            vec![json!(["1e6f89d7399081b4f8f8aa1ae2805a5efff2f960", 16])]
        );

        let missing = t
            .handle(&ctx(), vec![json!(ADDRESS), json!("0x9"), json!("0x10")])
            .await
            .unwrap();
        assert_eq!(missing, json!(EMPTY_STORAGE_SLOT));
    }

    #[tokio::test]
    async fn test_storage_requires_block() {
        let mock = Arc::new(MockBackend::new());
        let t = GetStorageAt { backend: backend(&mock) };
        let err = t.handle(&ctx(), vec![json!(ADDRESS), json!("0x0")]).await.unwrap_err();
        assert_eq!(err.to_string(), "empty parameter value");
    }
}
