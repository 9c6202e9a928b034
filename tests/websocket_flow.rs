use futures::{SinkExt, StreamExt};
use market_data_engine::{MarketDataServer, ServerConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (Arc<MarketDataServer>, SocketAddr, JoinHandle<()>) {
    let config = ServerConfig {
        tick_interval_ms: 50,
        idle_warn_after_secs: 0,
        ..ServerConfig::default()
    };
    let server = Arc::new(MarketDataServer::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        })
    };
    (server, addr, handle)
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    ws
}

/// Next JSON text frame, failing after a bounded wait
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip frames until one of type `kind` arrives
async fn next_of_type(ws: &mut Client, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_subscribe_receive_and_unsubscribe() {
    let (server, addr, handle) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["message"], "Connected to market data stream");
    assert!(welcome["clientId"].as_str().is_some());

    send(
        &mut ws,
        json!({"action": "subscribe", "type": "market_data", "pairs": ["EUR/USD"]}),
    )
    .await;

    let confirm = next_of_type(&mut ws, "subscription_success").await;
    assert_eq!(confirm["subscribed"], json!(["EUR/USD"]));

    let quote = next_of_type(&mut ws, "market_data").await;
    let data = &quote["data"];
    assert_eq!(data["pair"], "EUR/USD");
    let bid = data["bid"].as_f64().unwrap();
    let ask = data["ask"].as_f64().unwrap();
    assert!((1.0851..=1.0861).contains(&bid));
    assert!((ask - bid - 0.0002).abs() < 1e-9);
    assert!(data["change"] == "up" || data["change"] == "down");

    // Quotes for unsubscribed pairs never arrive
    for _ in 0..3 {
        let quote = next_of_type(&mut ws, "market_data").await;
        assert_eq!(quote["data"]["pair"], "EUR/USD");
    }

    send(&mut ws, json!({"action": "ping"})).await;
    let pong = next_of_type(&mut ws, "pong").await;
    assert!(pong["timestamp"].as_i64().unwrap() > 0);

    send(
        &mut ws,
        json!({"action": "unsubscribe", "type": "market_data", "pairs": ["EUR/USD"]}),
    )
    .await;
    next_of_type(&mut ws, "unsubscription_success").await;
    assert_eq!(server.registry().subscription_count(), 0);

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let (server, addr, handle) = start_server().await;
    let mut ws = connect(addr, "/").await;
    next_of_type(&mut ws, "welcome").await;

    ws.send(Message::Text("{not json".to_string())).await.unwrap();
    let error = next_json(&mut ws).await;
    assert_eq!(error, json!({"type": "error", "message": "Invalid JSON format"}));

    send(&mut ws, json!({"action": "teleport"})).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error, json!({"type": "error", "message": "Unknown action"}));

    send(&mut ws, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut ws).await["type"], "pong");
    assert_eq!(server.registry().len(), 1);

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_trade_notification_reaches_every_client() {
    let (server, addr, handle) = start_server().await;
    let mut a = connect(addr, "/ws").await;
    let mut b = connect(addr, "/ws").await;
    next_of_type(&mut a, "welcome").await;
    next_of_type(&mut b, "welcome").await;

    let delivery = server
        .bridge()
        .notify_all(json!({"tradeId": "T-42", "pair": "GBP/USD"}))
        .unwrap();
    assert_eq!(delivery.delivered, 2);

    for ws in [&mut a, &mut b] {
        let update = next_of_type(ws, "trade_update").await;
        assert_eq!(update["data"]["tradeId"], "T-42");
    }

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_client_close_removes_connection() {
    let (server, addr, handle) = start_server().await;
    let mut ws = connect(addr, "/ws").await;
    next_of_type(&mut ws, "welcome").await;
    assert_eq!(server.registry().len(), 1);

    ws.close(None).await.unwrap();

    let mut removed = false;
    for _ in 0..100 {
        if server.registry().is_empty() {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(removed);

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let (server, addr, handle) = start_server().await;
    let mut ws = connect(addr, "/ws").await;
    next_of_type(&mut ws, "welcome").await;

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    // Drain until the server's Close frame or the end of the stream
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_engine_removal_closes_socket() {
    let (server, addr, handle) = start_server().await;
    let mut ws = connect(addr, "/ws").await;
    let welcome = next_of_type(&mut ws, "welcome").await;
    let id: uuid::Uuid = welcome["clientId"].as_str().unwrap().parse().unwrap();

    // Same path a slow client takes when its outbound buffer fills
    assert!(server.registry().remove(&id));

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    server.shutdown_token().cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
