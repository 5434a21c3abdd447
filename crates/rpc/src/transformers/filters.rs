// rpc/src/transformers/filters.rs

use async_trait::async_trait;
use bridge_backend::Backend;
use bridge_codec::{add_hex_prefix, decode_u64};
use serde_json::{json, Value};
use std::sync::Arc;

use super::logs::search;
use super::Transformer;
use crate::params::{string_param, BlockTag, LogQuery};
use crate::{BackendContext, Filter, FilterKind, FilterRegistry, RequestContext, RpcError, RpcResult};

pub(super) fn transformers(backend: &Backend, filters: &Arc<FilterRegistry>) -> Vec<Arc<dyn Transformer>> {
    let state = FilterState {
        backend: backend.clone(),
        filters: filters.clone(),
    };
    vec![
        Arc::new(NewFilter(state.clone())),
        Arc::new(NewBlockFilter(state.clone())),
        Arc::new(NewPendingTransactionFilter(state.clone())),
        Arc::new(GetFilterChanges(state.clone())),
        Arc::new(GetFilterLogs(state.clone())),
        Arc::new(UninstallFilter(state)),
    ]
}

#[derive(Clone)]
pub struct FilterState {
    backend: Backend,
    filters: Arc<FilterRegistry>,
}

impl FilterState {
    async fn block_count(&self) -> RpcResult<u64> {
        self.backend
            .get_block_count()
            .await
            .map_err(|e| RpcError::Callback(e.to_string()))
    }

    /// Look up the filter named by the first param
    fn lookup(&self, params: &[Value]) -> RpcResult<Arc<Filter>> {
        let raw = string_param(params, 0, "filter id")?;
        let id = decode_u64(raw).map_err(|_| RpcError::InvalidFilterId(raw.to_string()))?;
        self.filters
            .get(id)
            .ok_or_else(|| RpcError::InvalidFilterId(raw.to_string()))
    }

    /// Hashes of every block from the cursor to the tip
    async fn block_changes(&self, filter: &Filter) -> RpcResult<Value> {
        let mut cursor = filter.cursor().await;
        let current = self.block_count().await?;
        let mut hashes = Vec::new();
        for height in *cursor..=current {
            let hash = self
                .backend
                .get_block_hash(height)
                .await
                .with_context(|| format!("getblockhash {}", height))?;
            hashes.push(add_hex_prefix(&hash));
        }
        if current >= *cursor {
            *cursor = current + 1;
        }
        Ok(json!(hashes))
    }

    async fn log_changes(&self, filter: &Filter, query: &LogQuery) -> RpcResult<Value> {
        let mut cursor = filter.cursor().await;
        let current = self.block_count().await?;
        let to = match query.to_block {
            BlockTag::Number(n) => n.min(current),
            _ => current,
        };
        let logs = search(&self.backend, query, *cursor, to).await?;
        if to >= *cursor {
            *cursor = to + 1;
        }
        serde_json::to_value(logs).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

pub struct NewFilter(FilterState);

#[async_trait]
impl Transformer for NewFilter {
    fn method_name(&self) -> &'static str {
        "eth_newFilter"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let query = LogQuery::parse(params.first())?;
        let first = match query.from_block {
            BlockTag::Latest => self.0.block_count().await? + 1,
            tag => tag.resolve(&self.0.backend).await?,
        };
        let filter = self.0.filters.insert(FilterKind::Log(query), first);
        Ok(json!(filter.hex_id()))
    }
}

pub struct NewBlockFilter(FilterState);

#[async_trait]
impl Transformer for NewBlockFilter {
    fn method_name(&self) -> &'static str {
        "eth_newBlockFilter"
    }

    async fn handle(&self, ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let current = self.0.block_count().await?;
        let filter = self.0.filters.insert(FilterKind::Block, current + 1);
        self.0.backend.generate_if_possible(&ctx.cancel).await;
        Ok(json!(filter.hex_id()))
    }
}

pub struct NewPendingTransactionFilter(FilterState);

#[async_trait]
impl Transformer for NewPendingTransactionFilter {
    fn method_name(&self) -> &'static str {
        "eth_newPendingTransactionFilter"
    }

    async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
        let current = self.0.block_count().await?;
        let filter = self.0.filters.insert(FilterKind::PendingTransaction, current + 1);
        Ok(json!(filter.hex_id()))
    }
}

pub struct GetFilterChanges(FilterState);

#[async_trait]
impl Transformer for GetFilterChanges {
    fn method_name(&self) -> &'static str {
        "eth_getFilterChanges"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let filter = self.0.lookup(&params)?;
        match &filter.kind {
            FilterKind::Block => self.0.block_changes(&filter).await,
            FilterKind::Log(query) => self.0.log_changes(&filter, query).await,
            // the backend mempool is not exposed
            FilterKind::PendingTransaction => Ok(json!([])),
        }
    }
}

pub struct GetFilterLogs(FilterState);

#[async_trait]
impl Transformer for GetFilterLogs {
    fn method_name(&self) -> &'static str {
        "eth_getFilterLogs"
    }

    /// Every log over the filter's original range; the cursor is left alone
    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let filter = self.0.lookup(&params)?;
        let query = match &filter.kind {
            FilterKind::Log(query) => query,
            _ => return Err(RpcError::InvalidParams("filter not found".into())),
        };
        let from = query.from_block.resolve(&self.0.backend).await?;
        let to = query.to_block.resolve(&self.0.backend).await?;
        let logs = search(&self.0.backend, query, from, to).await?;
        serde_json::to_value(logs).map_err(|e| RpcError::Internal(e.to_string()))
    }
}

pub struct UninstallFilter(FilterState);

#[async_trait]
impl Transformer for UninstallFilter {
    fn method_name(&self) -> &'static str {
        "eth_uninstallFilter"
    }

    async fn handle(&self, _ctx: &RequestContext, params: Vec<Value>) -> RpcResult<Value> {
        let raw = string_param(&params, 0, "filter id")?;
        let id = decode_u64(raw).map_err(|_| RpcError::InvalidFilterId(raw.to_string()))?;
        Ok(json!(self.0.filters.remove(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::logs::tests::{receipt, TOPIC_TRANSFER};
    use crate::transformers::test_support::{backend_on, ctx};
    use bridge_backend::{MockBackend, Network};

    fn state(mock: &Arc<MockBackend>) -> FilterState {
        FilterState {
            backend: backend_on(mock, Network::Test),
            filters: Arc::new(FilterRegistry::new()),
        }
    }

    #[tokio::test]
    async fn test_block_filter_ranges_are_disjoint() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockcount", json!(100));
        mock.push("getblockcount", json!(100));
        mock.push("getblockcount", json!(102));
        mock.push("getblockcount", json!(102));
        mock.push("getblockhash", json!("aa"));
        mock.push("getblockhash", json!("bb"));
        let state = state(&mock);

        let id = NewBlockFilter(state.clone()).handle(&ctx(), vec![]).await.unwrap();
        assert_eq!(id, json!("0x1"));

        let changes = GetFilterChanges(state.clone());
        // nothing new yet
        assert_eq!(changes.handle(&ctx(), vec![id.clone()]).await.unwrap(), json!([]));
        assert_eq!(
            changes.handle(&ctx(), vec![id.clone()]).await.unwrap(),
            json!(["0xaa", "0xbb"])
        );
        assert_eq!(mock.params("getblockhash"), vec![json!([101]), json!([102])]);
        assert_eq!(changes.handle(&ctx(), vec![id]).await.unwrap(), json!([]));
        assert_eq!(mock.calls("getblockhash"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_polls_never_duplicate() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockcount", json!(10));
        mock.push("getblockcount", json!(13));
        mock.push("getblockhash", json!("ab"));
        let state = state(&mock);
        let id = NewBlockFilter(state.clone()).handle(&ctx(), vec![]).await.unwrap();

        let changes = Arc::new(GetFilterChanges(state));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let changes = changes.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                changes.handle(&ctx(), vec![id]).await.unwrap()
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap().as_array().unwrap().len();
        }
        assert_eq!(total, 3);
        assert_eq!(mock.calls("getblockhash"), 3);
    }

    #[tokio::test]
    async fn test_log_filter_advances_cursor() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockcount", json!(20));
        mock.push("getblockcount", json!(25));
        mock.push("searchlogs", json!([receipt(21, &[TOPIC_TRANSFER])]));
        let state = state(&mock);

        let id = NewFilter(state.clone())
            .handle(&ctx(), vec![json!({"address": "0xdd"})])
            .await
            .unwrap();
        let changes = GetFilterChanges(state);
        let logs = changes.handle(&ctx(), vec![id.clone()]).await.unwrap();
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(mock.params("searchlogs")[0][0], json!(21));
        assert_eq!(mock.params("searchlogs")[0][1], json!(25));

        // the tip did not move: no second search
        changes.handle(&ctx(), vec![id]).await.unwrap();
        assert_eq!(mock.calls("searchlogs"), 1);
    }

    #[tokio::test]
    async fn test_filter_logs_uses_original_range() {
        let mock = Arc::new(MockBackend::new());
        mock.push("searchlogs", json!([]));
        let state = state(&mock);
        let id = NewFilter(state.clone())
            .handle(&ctx(), vec![json!({"fromBlock": "0x5", "toBlock": "0x9"})])
            .await
            .unwrap();
        GetFilterLogs(state.clone()).handle(&ctx(), vec![id.clone()]).await.unwrap();
        GetFilterLogs(state).handle(&ctx(), vec![id]).await.unwrap();
        let params = mock.params("searchlogs");
        assert_eq!(params.len(), 2);
        assert_eq!(params[1][0], json!(5));
        assert_eq!(params[1][1], json!(9));
    }

    #[tokio::test]
    async fn test_unknown_filter_id() {
        let mock = Arc::new(MockBackend::new());
        let state = state(&mock);
        let err = GetFilterChanges(state.clone())
            .handle(&ctx(), vec![json!("0x99")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
        assert_eq!(err.to_string(), "Invalid filter id 0x99");
    }

    #[tokio::test]
    async fn test_uninstall_is_idempotent() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockcount", json!(1));
        let state = state(&mock);
        let id = NewPendingTransactionFilter(state.clone())
            .handle(&ctx(), vec![])
            .await
            .unwrap();
        let uninstall = UninstallFilter(state.clone());
        assert_eq!(uninstall.handle(&ctx(), vec![id.clone()]).await.unwrap(), json!(true));
        assert_eq!(uninstall.handle(&ctx(), vec![id]).await.unwrap(), json!(false));
        assert!(state.filters.is_empty());
    }
}
