// rpc/tests/websocket.rs

use bridge_backend::{Backend, BackendOptions, MockBackend, Network};
use futures::{SinkExt, StreamExt};
use rpc::subscription::{PollCursor, SubscriptionAgent};
use rpc::{FilterRegistry, HealthChecker, RpcConfig, RpcMethods, RpcServer, SubscriptionRegistry};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

struct Harness {
    mock: Arc<MockBackend>,
    server: Arc<RpcServer>,
    agent: SubscriptionAgent,
    addr: SocketAddr,
}

fn harness() -> Harness {
    let mock = Arc::new(MockBackend::new());
    let backend = Backend::new(mock.clone(), Network::Main, BackendOptions::default());
    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let methods = Arc::new(RpcMethods::new(&backend, Arc::new(FilterRegistry::new()), false));
    let config = RpcConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..RpcConfig::default()
    };
    let server = Arc::new(RpcServer::new(
        config,
        methods,
        Arc::new(HealthChecker::new(backend.clone())),
        subscriptions.clone(),
    ));
    let (addr, serving) = server.clone().bind().unwrap();
    tokio::spawn(serving);
    let agent = SubscriptionAgent::new(backend, subscriptions, Duration::from_millis(50));
    Harness {
        mock,
        server,
        agent,
        addr,
    }
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_new_heads_are_pushed() {
    let h = harness();
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", h.addr))
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut read).await;
    assert_eq!(reply["id"], 1);
    let sub_id = reply["result"].as_str().unwrap().to_string();

    h.mock.push("getblockcount", json!(10));
    h.mock.push("getblockcount", json!(11));
    h.mock.push("getblockhash", json!("ab".repeat(32)));
    h.mock.push(
        "getblock",
        json!({"hash": "ab".repeat(32), "height": 11, "time": 1600000000, "previousblockhash": "cd".repeat(32)}),
    );

    let mut cursor = PollCursor::default();
    h.agent.poll(&mut cursor).await.unwrap();
    assert_eq!(cursor.height(), Some(10));
    h.agent.poll(&mut cursor).await.unwrap();

    let note = next_json(&mut read).await;
    assert_eq!(note["method"], "eth_subscription");
    assert_eq!(note["params"]["subscription"], sub_id.as_str());
    assert_eq!(note["params"]["result"]["number"], "0xb");
    assert_eq!(note["params"]["result"]["hash"], format!("0x{}", "ab".repeat(32)));
}

#[tokio::test]
async fn test_requests_and_shutdown_over_socket() {
    let h = harness();
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", h.addr))
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            r#"[{"jsonrpc":"2.0","id":1,"method":"net_listening"},{"jsonrpc":"2.0","id":2,"method":"eth_unsubscribe","params":["0x1234"]}]"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut read).await;
    assert_eq!(reply[0]["result"], true);
    assert_eq!(reply[1]["result"], false);

    h.server.shutdown();
    write
        .send(Message::Text(
            r#"{"jsonrpc":"2.0","id":3,"method":"net_listening"}"#.into(),
        ))
        .await
        .unwrap();
    let reply = next_json(&mut read).await;
    assert_eq!(reply["id"], 3);
    assert_eq!(reply["error"]["code"], -32000);
    assert_eq!(reply["error"]["message"], "server is shutting down");
}

#[tokio::test]
async fn test_closing_socket_drops_subscriptions() {
    let h = harness();
    h.mock.push("getblockcount", json!(5));
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", h.addr))
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();
    write
        .send(Message::Text(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}"#.into(),
        ))
        .await
        .unwrap();
    next_json(&mut read).await;

    write.send(Message::Close(None)).await.unwrap();
    drop(write);
    drop(read);

    // once the session is gone the agent has nobody to poll for
    let mut attempts = 0;
    loop {
        let mut cursor = PollCursor::default();
        h.agent.poll(&mut cursor).await.unwrap();
        if cursor.height().is_none() {
            break;
        }
        attempts += 1;
        assert!(attempts < 100, "subscription outlived its connection");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let calls = h.mock.total_calls();
    h.agent.poll(&mut PollCursor::default()).await.unwrap();
    assert_eq!(h.mock.total_calls(), calls);
}
