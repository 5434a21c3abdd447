// bridge-backend/tests/http_transport.rs

use bridge_backend::{
    Backend, BackendClient, BackendError, BackendOptions, Cancellation, HttpClient, HttpClientConfig,
    Network,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Answers like a backend node: echoes the id, picks a reply by method
async fn fake_node(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let authorized = req
        .headers()
        .get("authorization")
        .map(|v| v == "Basic cXR1bTp0ZXN0cGFzc3dk")
        .unwrap_or(false);
    let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
    let request: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    let id = request["id"].clone();

    if !authorized {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        return Ok(response);
    }

    let (status, body) = match request["method"].as_str() {
        Some("getblockcount") => (StatusCode::OK, json!({"result": 4242, "error": null, "id": id})),
        Some("getblockchaininfo") => (
            StatusCode::OK,
            json!({"result": {"chain": "regtest", "blocks": 4242, "headers": 4242}, "error": null, "id": id}),
        ),
        Some("getblockhash") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"result": null, "error": {"code": -8, "message": "Block height out of range"}, "id": id}),
        ),
        Some("sendrawtransaction") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"result": null, "error": {"code": -27, "message": "transaction already in block chain"}, "id": id}),
        ),
        Some("gettransaction") => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"result": null, "error": {"code": -5, "message": "Invalid or non-wallet transaction id"}, "id": id}),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            json!({"result": null, "error": {"code": -32601, "message": "Method not found"}, "id": id}),
        ),
    };
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    Ok(response)
}

fn spawn_fake_node() -> SocketAddr {
    let make_svc = make_service_fn(|_| async { Ok::<_, Infallible>(service_fn(fake_node)) });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn client(addr: SocketAddr, credentials: &str) -> HttpClient {
    HttpClient::new(HttpClientConfig {
        url: format!("http://{}@{}", credentials, addr),
        timeout: Duration::from_secs(5),
        log_requests: false,
    })
    .unwrap()
}

#[tokio::test]
async fn test_typed_calls_over_http() {
    let addr = spawn_fake_node();
    let backend = Backend::new(
        Arc::new(client(addr, "qtum:testpasswd")),
        Network::Auto,
        BackendOptions::default(),
    );
    backend.start();

    assert_eq!(backend.get_block_count().await.unwrap(), 4242);
    assert_eq!(
        backend.chain(&Cancellation::never()).await.unwrap(),
        bridge_codec::Chain::RegTest
    );
}

#[tokio::test]
async fn test_error_codes_are_classified() {
    let addr = spawn_fake_node();
    let client = client(addr, "qtum:testpasswd");

    let err = client.call("getblockhash", json!([99999])).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidParameter(_)));

    let err = client.call("sendrawtransaction", json!(["00"])).await.unwrap_err();
    assert!(matches!(err, BackendError::AlreadyInChain(_)));

    let err = client.call("gettransaction", json!(["ff"])).await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidAddress(_)));

    let err = client.call("nosuchmethod", json!([])).await.unwrap_err();
    assert_eq!(err.code(), Some(-32601));
}

#[tokio::test]
async fn test_wrong_credentials_surface_as_unreachable() {
    let addr = spawn_fake_node();
    let err = client(addr, "qtum:wrong").call("getblockcount", json!([])).await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)));
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    // bind and drop to get a port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let err = client(addr, "qtum:testpasswd").call("getblockcount", json!([])).await.unwrap_err();
    assert!(matches!(err, BackendError::Unreachable(_)));
}
