// rpc/src/methods.rs

//! Dispatch table: JSON-RPC envelopes in, envelopes out.

use bridge_backend::{Backend, Cancellation};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::params::params_array;
use crate::transformers::{self, Transformer};
use crate::{FilterRegistry, RpcError, RpcRequest, RpcResponse, RpcResult, Session};

/// Per-request state handed to every transformer
#[derive(Clone)]
pub struct RequestContext {
    /// Fires when the client goes away
    pub cancel: Cancellation,
    /// Set for persistent connections only
    pub session: Option<Arc<Session>>,
}

impl RequestContext {
    pub fn new(cancel: Cancellation) -> Self {
        Self {
            cancel,
            session: None,
        }
    }

    pub fn with_session(cancel: Cancellation, session: Arc<Session>) -> Self {
        Self {
            cancel,
            session: Some(session),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Cancellation::never())
    }
}

pub struct RpcMethods {
    transformers: HashMap<&'static str, Arc<dyn Transformer>>,
    /// Present in single-threaded mode
    serial: Option<Mutex<()>>,
    shutting_down: AtomicBool,
    log_bodies: bool,
}

impl RpcMethods {
    pub fn new(backend: &Backend, filters: Arc<FilterRegistry>, single_threaded: bool) -> Self {
        Self::from_transformers(transformers::all(backend, &filters), single_threaded)
    }

    pub fn from_transformers(list: Vec<Arc<dyn Transformer>>, single_threaded: bool) -> Self {
        let mut transformers = HashMap::with_capacity(list.len());
        for t in list {
            if transformers.insert(t.method_name(), t.clone()).is_some() {
                tracing::warn!(method = t.method_name(), "Transformer registered twice");
            }
        }
        Self {
            transformers,
            serial: single_threaded.then(|| Mutex::new(())),
            shutting_down: AtomicBool::new(false),
            log_bodies: false,
        }
    }

    /// Log request and response bodies at debug level
    pub fn with_body_logging(mut self, enabled: bool) -> Self {
        self.log_bodies = enabled;
        self
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.transformers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn handle(&self, ctx: &RequestContext, method: &str, params: Value) -> RpcResult<Value> {
        if self.is_shutting_down() {
            return Err(RpcError::Shutdown);
        }
        let transformer = self
            .transformers
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        let params = params_array(params)?;

        let _guard = match &self.serial {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        transformer.handle(ctx, params).await
    }

    pub async fn process_request(&self, ctx: &RequestContext, request: RpcRequest) -> RpcResponse {
        if self.log_bodies {
            tracing::debug!(method = %request.method, params = %request.params, id = %request.id, "=> request");
        }
        let response = match self.handle(ctx, &request.method, request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(error) => {
                tracing::debug!(method = %request.method, error = %error, "Request failed");
                RpcResponse::failure(request.id, &error)
            }
        };
        if self.log_bodies {
            match serde_json::to_string(&response) {
                Ok(body) => tracing::debug!(body = %body, "<= response"),
                Err(e) => tracing::debug!(error = %e, "<= unencodable response"),
            }
        }
        response
    }

    async fn process_value(&self, ctx: &RequestContext, value: Value, deadline: Option<Instant>) -> RpcResponse {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request = match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => request,
            Err(e) => return RpcResponse::failure(id, &RpcError::InvalidRequest(e.to_string())),
        };
        let Some(deadline) = deadline else {
            return self.process_request(ctx, request).await;
        };
        let method = request.method.clone();
        match tokio::time::timeout_at(deadline, self.process_request(ctx, request)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(method = %method, "Request timed out");
                RpcResponse::failure(id, &RpcError::Callback("request timed out".into()))
            }
        }
    }

    /// Handle one raw body: a single request or a batch.
    ///
    /// Batch elements run one after another so later calls observe the
    /// effects of earlier ones.
    pub async fn process_body(&self, ctx: &RequestContext, body: &[u8]) -> String {
        self.process_body_until(ctx, body, None).await
    }

    /// Like `process_body`, but every request still running at `deadline`
    /// fails with its own id; later batch elements fail straight away
    pub async fn process_body_until(
        &self,
        ctx: &RequestContext,
        body: &[u8],
        deadline: Option<Instant>,
    ) -> String {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return encode(&RpcResponse::failure(Value::Null, &RpcError::ParseError)),
        };
        match value {
            Value::Array(items) if items.is_empty() => encode(&RpcResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("empty batch".into()),
            )),
            Value::Array(items) => {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    responses.push(self.process_value(ctx, item, deadline).await);
                }
                encode(&responses)
            }
            value @ Value::Object(_) => encode(&self.process_value(ctx, value, deadline).await),
            _ => encode(&RpcResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("request must be an object or an array".into()),
            )),
        }
    }
}

fn encode<T: serde::Serialize>(response: &T) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Couldn't encode response");
        r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"couldn't encode response"},"id":null}"#
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubscriptionRegistry;
    use bridge_backend::{BackendOptions, MockBackend, Network};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn methods(mock: &Arc<MockBackend>) -> RpcMethods {
        let backend = Backend::new(mock.clone(), Network::Test, BackendOptions::default());
        RpcMethods::new(&backend, Arc::new(FilterRegistry::new()), false)
    }

    async fn call(methods: &RpcMethods, body: &str) -> Value {
        let ctx = RequestContext::default();
        serde_json::from_str(&methods.process_body(&ctx, body.as_bytes()).await).unwrap()
    }

    #[tokio::test]
    async fn test_catalogue_is_complete() {
        let mock = Arc::new(MockBackend::new());
        let names = methods(&mock).method_names();
        for method in [
            "web3_clientVersion",
            "web3_sha3",
            "net_version",
            "net_listening",
            "net_peerCount",
            "eth_chainId",
            "eth_protocolVersion",
            "eth_blockNumber",
            "eth_syncing",
            "eth_gasPrice",
            "eth_mining",
            "eth_hashrate",
            "eth_accounts",
            "eth_getCompilers",
            "eth_getUncleByBlockHashAndIndex",
            "eth_getUncleByBlockNumberAndIndex",
            "eth_getUncleCountByBlockHash",
            "eth_getUncleCountByBlockNumber",
            "eth_getBalance",
            "eth_getTransactionCount",
            "eth_getCode",
            "eth_getStorageAt",
            "eth_getBlockByNumber",
            "eth_getBlockByHash",
            "eth_getTransactionByHash",
            "eth_getTransactionByBlockHashAndIndex",
            "eth_getTransactionByBlockNumberAndIndex",
            "eth_getTransactionReceipt",
            "eth_sendTransaction",
            "eth_sendRawTransaction",
            "eth_call",
            "eth_estimateGas",
            "eth_getLogs",
            "eth_newFilter",
            "eth_newBlockFilter",
            "eth_newPendingTransactionFilter",
            "eth_getFilterChanges",
            "eth_getFilterLogs",
            "eth_uninstallFilter",
            "eth_subscribe",
            "eth_unsubscribe",
            "qtum_getUTXOs",
            "dev_gethexaddress",
            "dev_fromhexaddress",
            "dev_generatetoaddress",
        ] {
            assert!(names.contains(&method), "{} not registered", method);
        }
    }

    #[tokio::test]
    async fn test_parse_error() {
        let mock = Arc::new(MockBackend::new());
        let out = call(&methods(&mock), "{not json").await;
        assert_eq!(out["error"]["code"], -32700);
        assert_eq!(out["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mock = Arc::new(MockBackend::new());
        let out = call(
            &methods(&mock),
            r#"{"jsonrpc":"2.0","id":7,"method":"eth_coinbase","params":[]}"#,
        )
        .await;
        assert_eq!(out["id"], 7);
        assert_eq!(out["error"]["code"], -32601);
        assert!(out.get("result").is_none());
    }

    #[tokio::test]
    async fn test_params_must_be_array() {
        let mock = Arc::new(MockBackend::new());
        let out = call(
            &methods(&mock),
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":{"a":1}}"#,
        )
        .await;
        assert_eq!(out["error"]["code"], -32602);
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_runs_in_order() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getblockcount", json!(5));
        let methods = methods(&mock);
        let out = call(
            &methods,
            r#"[
                {"jsonrpc":"2.0","id":1,"method":"eth_newBlockFilter","params":[]},
                {"jsonrpc":"2.0","id":2,"method":"eth_getFilterChanges","params":["0x1"]},
                {"jsonrpc":"2.0","id":3,"method":"eth_uninstallFilter","params":["0x1"]}
            ]"#,
        )
        .await;
        let list = out.as_array().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0]["id"], 1);
        assert_eq!(list[0]["result"], "0x1");
        assert_eq!(list[1]["id"], 2);
        assert_eq!(list[1]["result"], json!([]));
        assert_eq!(list[2]["result"], true);
    }

    #[tokio::test]
    async fn test_bad_batch_element() {
        let mock = Arc::new(MockBackend::new());
        let out = call(
            &methods(&mock),
            r#"[{"id":4}, {"jsonrpc":"2.0","id":5,"method":"net_listening"}]"#,
        )
        .await;
        assert_eq!(out[0]["id"], 4);
        assert_eq!(out[0]["error"]["code"], -32600);
        assert_eq!(out[1]["result"], true);

        let out = call(&methods(&mock), "[]").await;
        assert_eq!(out["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_requests() {
        let mock = Arc::new(MockBackend::new());
        let methods = methods(&mock);
        methods.begin_shutdown();
        let out = call(&methods, r#"{"jsonrpc":"2.0","id":1,"method":"net_listening"}"#).await;
        assert_eq!(out["error"]["code"], -32000);
        assert_eq!(out["error"]["message"], "server is shutting down");
    }

    #[tokio::test]
    async fn test_unsubscribe_over_session() {
        let mock = Arc::new(MockBackend::new());
        let methods = methods(&mock);
        let registry = Arc::new(SubscriptionRegistry::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::with_session(Cancellation::never(), Arc::new(Session::new(registry, tx)));

        let id = methods.handle(&ctx, "eth_subscribe", json!(["newHeads"])).await.unwrap();
        let first = methods.handle(&ctx, "eth_unsubscribe", json!([id.clone()])).await.unwrap();
        let second = methods.handle(&ctx, "eth_unsubscribe", json!([id])).await.unwrap();
        assert_eq!(first, json!(true));
        assert_eq!(second, json!(false));
    }

    /// Sleeps while recording how many calls overlap
    struct Overlap {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transformer for Overlap {
        fn method_name(&self) -> &'static str {
            "eth_blockNumber"
        }

        async fn handle(&self, _ctx: &RequestContext, _params: Vec<Value>) -> RpcResult<Value> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("0x9"))
        }
    }

    async fn peak_concurrency(single_threaded: bool) -> usize {
        let peak = Arc::new(AtomicUsize::new(0));
        let overlap = Overlap {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let methods = Arc::new(RpcMethods::from_transformers(vec![Arc::new(overlap)], single_threaded));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let methods = methods.clone();
            handles.push(tokio::spawn(async move {
                methods
                    .handle(&RequestContext::default(), "eth_blockNumber", json!([]))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), json!("0x9"));
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_threaded_mode_serialises() {
        assert_eq!(peak_concurrency(true).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_overlap_by_default() {
        assert!(peak_concurrency(false).await > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_requests_keep_their_ids() {
        let overlap = Overlap {
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let methods = RpcMethods::from_transformers(vec![Arc::new(overlap)], false);
        let ctx = RequestContext::default();
        let deadline = || Some(Instant::now() + std::time::Duration::from_millis(10));

        let raw = methods
            .process_body_until(&ctx, br#"{"jsonrpc":"2.0","id":7,"method":"eth_blockNumber"}"#, deadline())
            .await;
        let out: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(out["id"], 7);
        assert_eq!(out["error"]["code"], -32000);
        assert_eq!(out["error"]["message"], "request timed out");

        let raw = methods
            .process_body_until(
                &ctx,
                br#"[{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber"},{"jsonrpc":"2.0","id":"b","method":"eth_blockNumber"}]"#,
                deadline(),
            )
            .await;
        let out: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[1]["id"], "b");
        assert_eq!(out[1]["error"]["message"], "request timed out");

        let raw = methods
            .process_body_until(
                &ctx,
                br#"{"jsonrpc":"2.0","id":8,"method":"eth_blockNumber"}"#,
                Some(Instant::now() + std::time::Duration::from_secs(1)),
            )
            .await;
        let out: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(out["result"], "0x9");
    }
}
