// rpc/src/transformers/logs.rs

use async_trait::async_trait;
use bridge_backend::types::TransactionReceipt;
use bridge_backend::Backend;
use bridge_codec::{add_hex_prefix, encode_u64};
use serde_json::Value;
use std::sync::Arc;

use super::Transformer;
use crate::params::{topics_match, LogQuery};
use crate::{BackendContext, Log, RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend) -> Vec<Arc<dyn Transformer>> {
    vec![Arc::new(GetLogs { backend: backend.clone() })]
}

/// Convert one backend log entry; `index` is its position in the receipt
pub fn to_eth_log(receipt: &TransactionReceipt, index: usize) -> Option<Log> {
    let log = receipt.log.get(index)?;
    Some(Log {
        removed: false,
        log_index: encode_u64(index as u64),
        transaction_index: encode_u64(receipt.transaction_index),
        transaction_hash: add_hex_prefix(&receipt.transaction_hash),
        block_hash: add_hex_prefix(&receipt.block_hash),
        block_number: encode_u64(receipt.block_number),
        address: add_hex_prefix(&log.address),
        data: add_hex_prefix(&log.data),
        topics: log.topics.iter().map(|t| add_hex_prefix(t)).collect(),
        log_type: None,
    })
}

/// All logs of a receipt
pub fn receipt_logs(receipt: &TransactionReceipt) -> Vec<Log> {
    (0..receipt.log.len())
        .filter_map(|i| to_eth_log(receipt, i))
        .collect()
}

/// Search a block range and keep the logs matching every topic constraint.
///
/// The backend sees a collapsed topic filter, so results are checked again here.
pub async fn search(backend: &Backend, query: &LogQuery, from: u64, to: u64) -> RpcResult<Vec<Log>> {
    if from > to {
        return Ok(Vec::new());
    }
    let request = query.with_range(from, to);
    let receipts = backend
        .search_logs(&request)
        .await
        .with_context(|| format!("searchlogs {}..{}", from, to))?;

    let mut logs = Vec::new();
    for receipt in &receipts {
        for (i, entry) in receipt.log.iter().enumerate() {
            if !topics_match(&query.topics, &entry.topics) {
                continue;
            }
            if let Some(log) = to_eth_log(receipt, i) {
                logs.push(log);
            }
        }
    }
    Ok(logs)
}

pub struct GetLogs {
    backend: Backend,
}

#[async_trait]
impl Transformer for GetLogs {
    fn method_name(&self) -> &'static str {
        "eth_getLogs"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let query = LogQuery::parse(params.first())?;
        let from = query.from_block.resolve(&self.backend).await?;
        let to = query.to_block.resolve(&self.backend).await?;
        let logs = search(&self.backend, &query, from, to).await?;
        serde_json::to_value(logs).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transformers::test_support::{backend, ctx};
    use bridge_backend::MockBackend;
    use serde_json::json;

    pub const TOPIC_TRANSFER: &str =
        "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    pub const TOPIC_APPROVAL: &str =
        "8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

    pub fn receipt(block: u64, topics: &[&str]) -> Value {
        json!({
            "blockHash": "bb",
            "blockNumber": block,
            "transactionHash": "cc",
            "transactionIndex": 2,
            "from": "aa",
            "to": "dd",
            "cumulativeGasUsed": 100,
            "gasUsed": 100,
            "contractAddress": "dd",
            "excepted": "None",
            "log": [{"address": "dd", "topics": topics, "data": "00ff"}]
        })
    }

    #[tokio::test]
    async fn test_get_logs_range_and_shape() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockchaininfo", json!({"chain": "regtest", "blocks": 120, "headers": 120}));
        mock.push("searchlogs", json!([receipt(110, &[TOPIC_TRANSFER])]));
        let t = GetLogs { backend: backend(&mock) };
        let out = t
            .handle(&ctx(), vec![json!({"fromBlock": "0x64", "address": "0xDD"})])
            .await
            .unwrap();

        let params = mock.params("searchlogs");
        assert_eq!(params[0], json!([100, 120, {"addresses": ["dd"]}, null]));
        assert_eq!(out[0]["blockNumber"], "0x6e");
        assert_eq!(out[0]["logIndex"], "0x0");
        assert_eq!(out[0]["transactionIndex"], "0x2");
        assert_eq!(out[0]["address"], "0xdd");
        assert_eq!(out[0]["data"], "0x00ff");
        assert_eq!(out[0]["topics"][0], json!(format!("0x{}", TOPIC_TRANSFER)));
        assert!(out[0].get("removed").is_none());
    }

    #[tokio::test]
    async fn test_alternatives_are_post_filtered() {
        let mock = Arc::new(MockBackend::new());
        mock.push(
            "searchlogs",
            json!([
                receipt(5, &[TOPIC_TRANSFER, "01"]),
                receipt(6, &[TOPIC_APPROVAL, "02"]),
                receipt(7, &[TOPIC_TRANSFER, "03"])
            ]),
        );
        let t = GetLogs { backend: backend(&mock) };
        let out = t
            .handle(
                &ctx(),
                vec![json!({
                    "fromBlock": "0x1",
                    "toBlock": "0x9",
                    "topics": [format!("0x{}", TOPIC_TRANSFER), ["0x01", "0x02"]]
                })],
            )
            .await
            .unwrap();
        // alternatives collapse the backend topic filter to null
        assert_eq!(mock.params("searchlogs")[0][3], Value::Null);
        let logs = out.as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["blockNumber"], "0x5");
    }

    #[tokio::test]
    async fn test_empty_range_skips_backend() {
        let mock = Arc::new(MockBackend::new());
        let t = GetLogs { backend: backend(&mock) };
        let out = t
            .handle(&ctx(), vec![json!({"fromBlock": "0x9", "toBlock": "0x1"})])
            .await
            .unwrap();
        assert_eq!(out, json!([]));
        assert_eq!(mock.total_calls(), 0);
    }
}
