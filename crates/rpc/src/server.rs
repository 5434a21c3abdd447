// rpc/src/server.rs

use bridge_backend::CancelHandle;
use futures::{Future, SinkExt, StreamExt};
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::upgrade::Upgraded;
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;

use crate::subscription::DEFAULT_POLL_INTERVAL;
use crate::{
    HealthChecker, RequestContext, RpcError, RpcMethods, RpcResult, Session,
    SubscriptionRegistry,
};

pub const DEFAULT_PORT: u16 = 23889;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub listen_addr: SocketAddr,
    /// Serialise every call behind one lock
    pub single_threaded: bool,
    /// Log request and response bodies
    pub dev_mode: bool,
    /// How often the subscription agent polls the backend
    pub poll_interval: Duration,
    /// Upper bound for one HTTP request; `None` waits forever
    pub request_timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            single_threaded: false,
            dev_mode: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: None,
        }
    }
}

pub struct RpcServer {
    config: RpcConfig,
    methods: Arc<RpcMethods>,
    health: Arc<HealthChecker>,
    subscriptions: Arc<SubscriptionRegistry>,
    shutdown: watch::Sender<bool>,
}

impl RpcServer {
    pub fn new(
        config: RpcConfig,
        methods: Arc<RpcMethods>,
        health: Arc<HealthChecker>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            methods,
            health,
            subscriptions,
            shutdown,
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Bind the listener; the returned future serves until `shutdown`
    pub fn bind(
        self: Arc<Self>,
    ) -> RpcResult<(SocketAddr, impl Future<Output = RpcResult<()>> + Send)> {
        let value = self.clone();
        let make_svc = make_service_fn(move |_| {
            let server = value.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                }))
            }
        });

        let mut stop = self.shutdown.subscribe();
        let server = Server::try_bind(&self.config.listen_addr)
            .map_err(|e| RpcError::ServerError(e.to_string()))?
            .serve(make_svc);
        let addr = server.local_addr();
        tracing::info!("RPC server listening on {}", addr);

        let serving = async move {
            server
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                })
                .await
                .map_err(|e| RpcError::ServerError(e.to_string()))
        };
        Ok((addr, serving))
    }

    pub async fn start(self: Arc<Self>) -> RpcResult<()> {
        tracing::info!("Starting RPC server on {}", self.config.listen_addr);
        let (_, serving) = self.bind()?;
        serving.await
    }

    /// Reject new calls and stop accepting connections
    pub fn shutdown(&self) {
        tracing::info!("RPC server shutting down");
        self.methods.begin_shutdown();
        self.shutdown.send_replace(true);
    }

    pub async fn handle_request(self: Arc<Self>, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        if req.method() == Method::OPTIONS {
            return Ok(respond(StatusCode::OK, Body::empty()));
        }

        if req.method() == Method::GET {
            if is_websocket_upgrade(&req) {
                return Ok(self.upgrade(req));
            }
            return Ok(match req.uri().path() {
                "/live" | "/ready" => self.health_response().await,
                _ => respond(StatusCode::METHOD_NOT_ALLOWED, Body::from("Method not allowed")),
            });
        }

        if req.method() != Method::POST {
            return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Body::from("Method not allowed")));
        }

        let body = hyper::body::to_bytes(req.into_body()).await?;
        // dropped together with this future when the client goes away
        let cancel = CancelHandle::new();
        let ctx = RequestContext::new(cancel.token());
        let deadline = self
            .config
            .request_timeout
            .map(|limit| tokio::time::Instant::now() + limit);
        let json = self.methods.process_body_until(&ctx, &body, deadline).await;

        Ok(respond(StatusCode::OK, Body::from(json)))
    }

    async fn health_response(&self) -> Response<Body> {
        let report = self.health.check().await;
        let status = if report.is_healthy() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        respond(status, Body::from(report.to_json().to_string()))
    }

    fn upgrade(self: Arc<Self>, mut req: Request<Body>) -> Response<Body> {
        let accept = match req.headers().get(header::SEC_WEBSOCKET_KEY) {
            Some(key) => derive_accept_key(key.as_bytes()),
            None => {
                return respond(StatusCode::BAD_REQUEST, Body::from("Missing Sec-WebSocket-Key"));
            }
        };
        let accept = match HeaderValue::from_str(&accept) {
            Ok(accept) => accept,
            Err(_) => return respond(StatusCode::BAD_REQUEST, Body::empty()),
        };

        tokio::spawn(async move {
            match hyper::upgrade::on(&mut req).await {
                Ok(upgraded) => {
                    let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                    self.serve_session(ws).await;
                }
                Err(e) => tracing::warn!(error = %e, "WebSocket upgrade failed"),
            }
        });

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
        response
    }

    /// One persistent connection: requests and subscription pushes share the socket
    async fn serve_session(&self, ws: WebSocketStream<Upgraded>) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let session = Arc::new(Session::new(self.subscriptions.clone(), tx.clone()));
        let cancel = CancelHandle::new();
        let ctx = RequestContext::with_session(cancel.token(), session);
        tracing::debug!("WebSocket session opened");

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(message) = stream.next().await {
            let body = match message {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    break;
                }
            };
            let methods = self.methods.clone();
            let ctx = ctx.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let json = methods.process_body(&ctx, &body).await;
                let _ = tx.send(json);
            });
        }

        // cancels in-flight chain waits; the session drops its subscriptions
        // once the last request holding it finishes
        drop(cancel);
        drop(ctx);
        writer.abort();
        tracing::debug!("WebSocket session closed");
    }
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    let has = |name: header::HeaderName, needle: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(needle)))
            .unwrap_or(false)
    };
    has(header::UPGRADE, "websocket") && has(header::CONNECTION, "upgrade")
}

fn respond(status: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FilterRegistry;
    use bridge_backend::{Backend, BackendError, BackendOptions, MockBackend, Network};
    use serde_json::{json, Value};

    fn server(mock: &Arc<MockBackend>) -> Arc<RpcServer> {
        let backend = Backend::new(mock.clone(), Network::Main, BackendOptions::default());
        let methods = Arc::new(RpcMethods::new(&backend, Arc::new(FilterRegistry::new()), false));
        Arc::new(RpcServer::new(
            RpcConfig::default(),
            methods,
            Arc::new(HealthChecker::new(backend)),
            Arc::new(SubscriptionRegistry::new()),
        ))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let mock = Arc::new(MockBackend::new());
        let req = Request::builder().method(Method::OPTIONS).uri("/").body(Body::empty()).unwrap();
        let resp = server(&mock).handle_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        assert_eq!(resp.headers()["access-control-allow-methods"], "POST, OPTIONS");
    }

    #[tokio::test]
    async fn test_post_any_path() {
        let mock = Arc::new(MockBackend::new());
        let mut req = post(r#"{"jsonrpc":"2.0","id":3,"method":"net_listening","params":[]}"#);
        *req.uri_mut() = "/some/path".parse().unwrap();
        let resp = server(&mock).handle_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["result"], true);
        assert_eq!(body["id"], 3);
    }

    #[tokio::test]
    async fn test_errors_are_200() {
        let mock = Arc::new(MockBackend::new());
        let resp = server(&mock).handle_request(post("{oops")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_subscribe_needs_websocket() {
        let mock = Arc::new(MockBackend::new());
        let resp = server(&mock)
            .handle_request(post(r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_other_methods_rejected() {
        let mock = Arc::new(MockBackend::new());
        let req = Request::builder().method(Method::PUT).uri("/").body(Body::empty()).unwrap();
        let resp = server(&mock).handle_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getnetworkinfo", json!({"connections": 0}));
        mock.push("gettransactionreceipt", json!([]));
        mock.push("getblockchaininfo", json!({"chain": "main", "blocks": 10}));
        let req = Request::builder().method(Method::GET).uri("/ready").body(Body::empty()).unwrap();
        let resp = server(&mock).handle_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(resp).await;
        assert_eq!(body["backend-connection"], "backend has no connections");
        assert!(body.get("backend-blocks-syncing").is_none());
    }

    #[tokio::test]
    async fn test_live_endpoint_healthy() {
        let mock = Arc::new(MockBackend::new());
        mock.push("getnetworkinfo", json!({"connections": 4}));
        mock.push_error("gettransactionreceipt", BackendError::EmptyResponse);
        mock.push("getblockchaininfo", json!({"chain": "main", "blocks": 10}));
        let req = Request::builder().method(Method::GET).uri("/live").body(Body::empty()).unwrap();
        let resp = server(&mock).handle_request(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({}));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_calls() {
        let mock = Arc::new(MockBackend::new());
        let server = server(&mock);
        server.shutdown();
        let resp = server
            .clone()
            .handle_request(post(r#"{"jsonrpc":"2.0","id":1,"method":"net_listening"}"#))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "server is shutting down");
    }

    #[test]
    fn test_default_config() {
        let config = RpcConfig::default();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:23889");
        assert!(!config.single_threaded);
    }
}
