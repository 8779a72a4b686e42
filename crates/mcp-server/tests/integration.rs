//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use mcp_core::{ActionSchema, EventBus, EventKind, ParamSpec, Resource, ResourceType};
use mcp_rpc::{HandlerError, Processor, Registry, ServerFrame, handler_fn};
use mcp_server::{McpServer, ServerConfig, StaticTokenAuthProvider};

const TIMEOUT: Duration = Duration::from_secs(5);
/// How long the `slow` action takes.
const SLOW_CALL: Duration = Duration::from_secs(3);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    server: Arc<McpServer>,
    ws_url: String,
    http_url: String,
    calls: Arc<AtomicUsize>,
}

/// Boot a server with the `health-data` resource bound to an echo handler.
async fn boot_server(config: ServerConfig, with_auth: bool) -> TestServer {
    let events = Arc::new(EventBus::new());
    let registry = Arc::new(Registry::with_events(Arc::clone(&events)));
    assert!(
        registry.register_resource(
            Resource::new("health-data", ResourceType::DataSource, "Health data")
                .with_action(ActionSchema::new("get-data", "Get data").with_param("userId", ParamSpec::required("string")))
                .with_action(ActionSchema::new("explode", "Always fails"))
                .with_action(ActionSchema::new("slow", "Takes a while"))
                .with_action(ActionSchema::new("lookup", "Finds nothing"))
                .with_action(ActionSchema::new("reject", "Refuses")),
        )
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    assert!(registry.register_handler(
        "health-data",
        "get-data",
        handler_fn(move |params, _ctx| {
            let counter = Arc::clone(&counter);
            async move {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": params }))
            }
        }),
    ));
    assert!(registry.register_handler(
        "health-data",
        "explode",
        handler_fn(|_params, _ctx| async { Err::<Value, _>(HandlerError::internal("disk on fire at /var/db")) }),
    ));

    assert!(registry.register_handler(
        "health-data",
        "slow",
        handler_fn(|_params, _ctx| async {
            tokio::time::sleep(SLOW_CALL).await;
            Ok::<Value, HandlerError>(json!("slow-done"))
        }),
    ));
    assert!(registry.register_handler(
        "health-data",
        "lookup",
        handler_fn(|_params, _ctx| async { Err::<Value, _>(HandlerError::not_found("No record for u9")) }),
    ));
    assert!(registry.register_handler(
        "health-data",
        "reject",
        handler_fn(|_params, _ctx| async { Err::<Value, _>(HandlerError::failed("Record is locked")) }),
    ));

    let processor = Processor::new(Arc::clone(&registry));
    let mut server = McpServer::new(config, registry, processor, events);
    if with_auth {
        let provider: StaticTokenAuthProvider = [("tok-1", "u1")].into_iter().collect();
        server = server.with_auth_provider(Arc::new(provider));
    }
    let server = Arc::new(server);
    let (addr, _handle) = server.listen().await.unwrap();

    TestServer {
        server,
        ws_url: format!("ws://{addr}/ws"),
        http_url: format!("http://{addr}"),
        calls,
    }
}

async fn boot_default() -> TestServer {
    boot_server(ServerConfig::default(), false).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Connect and consume the welcome frame.
async fn connect_welcomed(url: &str) -> WsStream {
    let mut ws = connect(url).await;
    let welcome = read_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    ws
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn request(ws: &mut WsStream, request_id: &str, action: &str, params: Value) -> Value {
    send_json(
        ws,
        json!({
            "type": "request",
            "requestId": request_id,
            "resourceId": "health-data",
            "actionId": action,
            "params": params,
        }),
    )
    .await;
    read_json(ws).await
}

/// Read until a close frame arrives and return its code.
async fn read_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without close frame")
            .expect("ws error");
        if let Message::Close(frame) = msg {
            return frame.map_or(1005, |f| u16::from(f.code));
        }
    }
}

async fn wait_for_connections(server: &McpServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.connections().connection_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

// ── Connection lifecycle ──

#[tokio::test]
async fn e2e_welcome_on_connect() {
    let ts = boot_default().await;
    let mut ws = connect(&ts.ws_url).await;
    let welcome = read_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["clientId"].as_str().unwrap().starts_with("conn_"));
    assert!(welcome["timestamp"].is_string());
    assert_eq!(welcome["message"], "Connected to mcp-gateway");
}

#[tokio::test]
async fn e2e_client_close_removes_connection() {
    let ts = boot_default().await;
    let disconnected = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&disconnected);
    let _listener = ts.server.events().add_listener(EventKind::ClientDisconnected, move |_| {
        let _ = seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut ws = connect_welcomed(&ts.ws_url).await;
    wait_for_connections(&ts.server, 1).await;
    ws.close(None).await.unwrap();
    wait_for_connections(&ts.server, 0).await;
    timeout(TIMEOUT, async {
        while disconnected.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no disconnect event");
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

// ── Dispatch ──

#[tokio::test]
async fn e2e_validation_then_success() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;

    let resp = request(&mut ws, "r1", "get-data", json!({})).await;
    assert_eq!(resp["type"], "response");
    assert_eq!(resp["requestId"], "r1");
    assert_eq!(resp["status"], "BAD_REQUEST");
    assert!(resp["message"].as_str().unwrap().contains("userId"));
    assert_eq!(ts.calls.load(Ordering::SeqCst), 0);

    let resp = request(&mut ws, "r2", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["requestId"], "r2");
    assert_eq!(resp["status"], "SUCCESS");
    assert_eq!(resp["result"], json!({"echo": {"userId": "u1"}}));
    assert!(resp["timestamp"].is_i64());
    assert_eq!(ts.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn e2e_handler_fault_is_sanitized() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    let resp = request(&mut ws, "r1", "explode", json!({})).await;
    assert_eq!(resp["status"], "SERVER_ERROR");
    assert_eq!(resp["message"], "Internal server error");
    assert!(!resp.to_string().contains("/var/db"));
}

#[tokio::test]
async fn e2e_handler_error_kinds_map_to_status() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;

    let resp = request(&mut ws, "r1", "lookup", json!({})).await;
    assert_eq!(resp["status"], "NOT_FOUND");
    assert_eq!(resp["message"], "No record for u9");

    let resp = request(&mut ws, "r2", "reject", json!({})).await;
    assert_eq!(resp["status"], "SERVER_ERROR");
    assert_eq!(resp["message"], "Record is locked");
    assert!(resp["result"].is_null());
}

#[tokio::test]
async fn e2e_unknown_resource_is_not_found() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    send_json(
        &mut ws,
        json!({"type": "request", "requestId": "r9", "resourceId": "nope", "actionId": "x"}),
    )
    .await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["status"], "NOT_FOUND");
    assert_eq!(resp["requestId"], "r9");
}

#[tokio::test]
async fn e2e_generated_request_id() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    send_json(
        &mut ws,
        json!({"type": "request", "resourceId": "health-data", "actionId": "get-data", "params": {"userId": "u1"}}),
    )
    .await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["status"], "SUCCESS");
    assert!(resp["requestId"].as_str().unwrap().starts_with("req_"));
}

#[tokio::test]
async fn e2e_replies_keep_arrival_order() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    for i in 0..5 {
        send_json(
            &mut ws,
            json!({
                "type": "request",
                "requestId": format!("r{i}"),
                "resourceId": "health-data",
                "actionId": "get-data",
                "params": {"userId": format!("u{i}")},
            }),
        )
        .await;
    }
    for i in 0..5 {
        let resp = read_json(&mut ws).await;
        assert_eq!(resp["requestId"], format!("r{i}"));
    }
}

#[tokio::test]
async fn e2e_slow_handler_does_not_stall_others_or_drop_caller() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let ts = boot_server(config, false).await;
    let mut slow = connect_welcomed(&ts.ws_url).await;
    let mut quick = connect_welcomed(&ts.ws_url).await;

    send_json(
        &mut slow,
        json!({"type": "request", "requestId": "s1", "resourceId": "health-data", "actionId": "slow"}),
    )
    .await;

    // another connection is answered while the slow call is running
    let started = std::time::Instant::now();
    let resp = request(&mut quick, "q1", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["status"], "SUCCESS");
    assert!(started.elapsed() < Duration::from_secs(1));

    // reading keeps answering pings, so the slow caller outlives the heartbeat timeout
    let resp = read_json(&mut slow).await;
    assert_eq!(resp["requestId"], "s1");
    assert_eq!(resp["result"], "slow-done");

    let resp = request(&mut slow, "s2", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["status"], "SUCCESS");
}

// ── Malformed frames ──

#[tokio::test]
async fn e2e_invalid_json() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    ws.send(Message::text("{not json")).await.unwrap();
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["type"], "error");
    assert_eq!(resp["error"]["code"], "invalid_format");
}

#[tokio::test]
async fn e2e_unknown_type() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    send_json(&mut ws, json!({"type": "subscribe", "requestId": "r1"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["error"]["code"], "unknown_type");
    assert_eq!(resp["requestId"], "r1");
}

#[tokio::test]
async fn e2e_binary_utf8_frame_is_accepted() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    let body = json!({"type": "request", "requestId": "b1", "resourceId": "health-data", "actionId": "get-data", "params": {"userId": "u1"}});
    ws.send(Message::binary(body.to_string().into_bytes())).await.unwrap();
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["requestId"], "b1");
    assert_eq!(resp["status"], "SUCCESS");
}

// ── Authentication ──

#[tokio::test]
async fn e2e_unauthenticated_request_rejected() {
    let ts = boot_server(ServerConfig::default(), true).await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    let resp = request(&mut ws, "r1", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["type"], "error");
    assert_eq!(resp["error"]["code"], "unauthorized");
    assert_eq!(resp["requestId"], "r1");
    assert_eq!(ts.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn e2e_auth_failure_then_success() {
    let ts = boot_server(ServerConfig::default(), true).await;
    let mut ws = connect_welcomed(&ts.ws_url).await;

    send_json(&mut ws, json!({"type": "auth", "token": "wrong"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["type"], "auth_response");
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error"]["message"], "Invalid token");

    // still connected after a failed attempt
    send_json(&mut ws, json!({"type": "auth", "token": "tok-1"})).await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["userId"], "u1");

    let resp = request(&mut ws, "r2", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["status"], "SUCCESS");
    assert_eq!(ts.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn e2e_reconnect_must_reauthenticate() {
    let ts = boot_server(ServerConfig::default(), true).await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    send_json(&mut ws, json!({"type": "auth", "token": "tok-1"})).await;
    assert_eq!(read_json(&mut ws).await["success"], true);
    ws.close(None).await.unwrap();

    let mut ws = connect_welcomed(&ts.ws_url).await;
    let resp = request(&mut ws, "r1", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn e2e_broadcast_reaches_authenticated_only() {
    let ts = boot_server(ServerConfig::default(), true).await;
    let mut authed = Vec::new();
    for _ in 0..2 {
        let mut ws = connect_welcomed(&ts.ws_url).await;
        send_json(&mut ws, json!({"type": "auth", "token": "tok-1"})).await;
        assert_eq!(read_json(&mut ws).await["success"], true);
        authed.push(ws);
    }
    let mut anonymous = connect_welcomed(&ts.ws_url).await;
    wait_for_connections(&ts.server, 3).await;

    let frame = ServerFrame::error("notice", "maintenance soon", None);
    let delivered = ts
        .server
        .connections()
        .broadcast(&frame, |c| c.authenticated)
        .await;
    assert_eq!(delivered, 2);

    for ws in &mut authed {
        let msg = read_json(ws).await;
        assert_eq!(msg["error"]["message"], "maintenance soon");
    }
    // the anonymous client sees nothing before its own reply
    let resp = request(&mut anonymous, "r1", "get-data", json!({"userId": "u1"})).await;
    assert_eq!(resp["error"]["code"], "unauthorized");
}

// ── HTTP ──

#[tokio::test]
async fn e2e_discovery_over_http() {
    let ts = boot_default().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/mcp", ts.http_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["type"], "discovery");
    assert_eq!(body["server"]["websocket"], "/ws");
    assert_eq!(body["resources"][0]["id"], "health-data");

    let resp = client
        .get(format!("{}/mcp/resources/missing", ts.http_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let health: Value = client
        .get(format!("{}/health", ts.http_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["resources"], 1);
}

// ── Limits and shutdown ──

#[tokio::test]
async fn e2e_over_capacity_is_refused() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let ts = boot_server(config, false).await;
    let _first = connect_welcomed(&ts.ws_url).await;

    let err = connect_async(ts.ws_url.as_str()).await.unwrap_err();
    assert_matches!(err, tungstenite::Error::Http(resp) if resp.status() == 503);
}

#[tokio::test]
async fn e2e_shutdown_closes_with_normal_closure() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    wait_for_connections(&ts.server, 1).await;

    ts.server.shutdown().await;
    assert_eq!(read_close_code(&mut ws).await, 1000);
    wait_for_connections(&ts.server, 0).await;

    // no new upgrades once shutdown started
    assert!(connect_async(ts.ws_url.as_str()).await.is_err());
}

#[tokio::test]
async fn e2e_shutdown_answers_in_flight_request_before_closing() {
    let ts = boot_default().await;
    let mut ws = connect_welcomed(&ts.ws_url).await;
    send_json(
        &mut ws,
        json!({"type": "request", "requestId": "s1", "resourceId": "health-data", "actionId": "slow"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    ts.server.shutdown().await;
    let resp = read_json(&mut ws).await;
    assert_eq!(resp["requestId"], "s1");
    assert_eq!(resp["status"], "SUCCESS");
    assert_eq!(read_close_code(&mut ws).await, 1000);
    wait_for_connections(&ts.server, 0).await;
}

#[tokio::test]
async fn e2e_silent_client_is_dropped() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let ts = boot_server(config, false).await;
    let mut ws = connect_welcomed(&ts.ws_url).await;

    // not reading means pings go unanswered
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(read_close_code(&mut ws).await, 1001);
    wait_for_connections(&ts.server, 0).await;
}
