//! Session tests against a scripted in-process orchestrator

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use fci_client::{CallbackRegistry, OrchestrationClient, SessionSummary};
use fci_core::error::{ConfigError, FciError, RegistryError, SessionError, TransportError};
use fci_core::{RunContext, SessionConfig};
use fci_protocol::{ProtocolError, ResultSet, TestBatch};

const TOPIC: &str = "test_orchestrator:rspec-42";
const WAIT: Duration = Duration::from_secs(5);

fn context(port: u16) -> RunContext {
    RunContext::builder()
        .run_key("rspec")
        .build_id("42")
        .commit("0badc0de")
        .branch("main")
        .api_host(format!("127.0.0.1:{}", port))
        .secret_key("s3cret")
        .build()
        .unwrap()
}

/// Passes every test in the batch
fn pass_all(batch: TestBatch) -> ResultSet {
    batch
        .ids()
        .into_iter()
        .map(|id| (id, json!({ "status": "passed" })))
        .collect()
}

fn callbacks(inventory: &[&str]) -> CallbackRegistry {
    let inventory: Vec<String> = inventory.iter().map(|s| s.to_string()).collect();
    let mut callbacks = CallbackRegistry::new();
    callbacks
        .on_enq_request(move || inventory.into_iter().collect())
        .unwrap();
    callbacks.on_deq(pass_all).unwrap();
    callbacks
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn spawn_client(
    port: u16,
    callbacks: CallbackRegistry,
    config: SessionConfig,
) -> JoinHandle<Result<SessionSummary, FciError>> {
    let client = OrchestrationClient::new(context(port), callbacks).with_config(config);
    tokio::spawn(client.run())
}

async fn finish(client: JoinHandle<Result<SessionSummary, FciError>>) -> Result<SessionSummary, FciError> {
    tokio::time::timeout(WAIT, client)
        .await
        .expect("client did not finish")
        .expect("client task panicked")
}

/// Server side of one orchestrator connection
struct Orchestrator {
    ws: WebSocketStream<TcpStream>,
    uri: String,
}

impl Orchestrator {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("client never connected")
            .unwrap();

        let uri = Arc::new(Mutex::new(String::new()));
        let captured = Arc::clone(&uri);
        let capture = move |req: &Request, res: Response| -> Result<Response, ErrorResponse> {
            *captured.lock().unwrap() = req.uri().to_string();
            Ok(res)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, capture)
            .await
            .unwrap();

        let uri = uri.lock().unwrap().clone();
        Self { ws, uri }
    }

    /// Next text frame, heartbeats included
    async fn recv_raw(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Close(_) => panic!("connection closed while waiting for a frame"),
                _ => {}
            }
        }
    }

    /// Next channel frame, heartbeats skipped
    async fn recv(&mut self) -> Value {
        loop {
            let frame = self.recv_raw().await;
            if frame["event"] != "heartbeat" {
                return frame;
            }
        }
    }

    async fn expect(&mut self, event: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["event"], event, "unexpected frame {}", frame);
        assert_eq!(frame["topic"], TOPIC);
        frame
    }

    async fn send_text(&mut self, text: String) {
        self.ws.send(Message::Text(text)).await.unwrap();
    }

    /// Broadcast shape: event at the top level
    async fn push(&mut self, event: &str, payload: Value) {
        let frame = json!({ "topic": TOPIC, "event": event, "payload": payload, "ref": null });
        self.send_text(frame.to_string()).await;
    }

    /// Reply shape: event nested in `payload.response`
    async fn reply(&mut self, event: &str, mut response: Value) {
        response["event"] = json!(event);
        let frame = json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": response },
            "ref": "1",
        });
        self.send_text(frame.to_string()).await;
    }

    async fn expect_silence(&mut self, period: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(period, self.ws.next()).await {
            panic!("expected no frames, got {}", text);
        }
    }

    /// Wait for `leave` followed by the close handshake
    async fn expect_leave_and_close(&mut self) {
        self.expect("leave").await;
        loop {
            match tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("connection was not closed")
            {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                Some(Ok(Message::Text(text))) => panic!("frame after leave: {}", text),
                Some(Ok(_)) => {}
            }
        }
    }
}

#[tokio::test]
async fn test_leader_submits_inventory_and_runs_batches() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&["a.rb", "b.rb"]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    let join = orch.expect("phx_join").await;
    assert_eq!(join["ref"], 1);
    assert_eq!(join["payload"], json!({}));

    orch.reply("join", json!({ "node_index": 0 })).await;
    let enq = orch.expect("enq").await;
    assert_eq!(enq["payload"], json!({ "tests": ["a.rb", "b.rb"] }));
    assert_eq!(enq["ref"], 2);

    orch.push("deq_request", json!({})).await;
    let request = orch.expect("deq").await;
    assert_eq!(request["payload"], json!({}));

    orch.push("deq", json!({ "tests": ["a.rb", "b.rb"] })).await;
    let report = orch.expect("deq").await;
    assert_eq!(
        report["payload"],
        json!({ "a.rb": { "status": "passed" }, "b.rb": { "status": "passed" } })
    );

    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.node_index.map(|n| n.as_u32()), Some(0));
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.messages_sent, 5);
}

#[tokio::test]
async fn test_socket_url_carries_credentials() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    assert!(orch.uri.starts_with("/test_orchestrators/socket/websocket?"));
    for pair in [
        "build_id=42",
        "run_key=rspec",
        "secret_key=s3cret",
        "commit=0badc0de",
        "branch=main",
    ] {
        assert!(orch.uri.contains(pair), "{} missing from {}", pair, orch.uri);
    }

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;
    finish(client).await.unwrap();
}

#[tokio::test]
async fn test_follower_waits_for_deq_request() {
    let (listener, port) = listen().await;
    let inventory_called = Arc::new(AtomicBool::new(false));
    let called = Arc::clone(&inventory_called);

    let mut registry = CallbackRegistry::new();
    registry
        .on_enq_request(move || {
            called.store(true, Ordering::SeqCst);
            TestBatch::empty()
        })
        .unwrap();
    registry.on_deq(pass_all).unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.push("join", json!({ "node_index": 2 })).await;
    orch.expect_silence(Duration::from_millis(200)).await;

    orch.push("deq_request", json!({})).await;
    orch.expect("deq").await;
    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.batches, 0);
    assert!(!inventory_called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_join_into_running_build_requests_work() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&["a.rb"]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 3, "state": "running" }))
        .await;
    let request = orch.expect("deq").await;
    assert_eq!(request["payload"], json!({}));

    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;
    finish(client).await.unwrap();
}

#[tokio::test]
async fn test_leader_joining_running_build_submits_then_requests() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&["a.rb"]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 0, "state": "running" }))
        .await;
    orch.expect("enq").await;
    let request = orch.expect("deq").await;
    assert_eq!(request["payload"], json!({}));

    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;
    finish(client).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_batch_is_run_and_reported() {
    let (listener, port) = listen().await;
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let mut registry = CallbackRegistry::new();
    registry
        .on_deq(move |batch| {
            counter.fetch_add(1, Ordering::SeqCst);
            pass_all(batch)
        })
        .unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    for batch in [["a.rb"], ["b.rb"], ["c.rb"]] {
        orch.push("deq", json!({ "tests": batch })).await;
    }

    let mut reported = Vec::new();
    for _ in 0..3 {
        let report = orch.expect("deq").await;
        let payload = report["payload"].as_object().unwrap();
        reported.extend(payload.keys().cloned());
    }
    reported.sort();
    assert_eq!(reported, vec!["a.rb", "b.rb", "c.rb"]);

    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.batches, 3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_slow_batch_is_reported_before_leave() {
    let (listener, port) = listen().await;
    let mut registry = CallbackRegistry::new();
    registry
        .on_deq(|batch| {
            std::thread::sleep(Duration::from_millis(300));
            pass_all(batch)
        })
        .unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.push("deq", json!({ "tests": ["slow.rb"] })).await;
    orch.push("deq", json!({ "tests": [] })).await;

    let report = orch.expect("deq").await;
    assert_eq!(report["payload"], json!({ "slow.rb": { "status": "passed" } }));
    orch.expect_leave_and_close().await;
    finish(client).await.unwrap();
}

#[tokio::test]
async fn test_error_event_leaves_and_fails() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.push("error", json!({ "reason": "invalid secret key" }))
        .await;
    orch.expect_leave_and_close().await;

    match finish(client).await.unwrap_err() {
        FciError::Protocol(ProtocolError::Orchestrator(detail)) => {
            assert_eq!(detail, json!({ "reason": "invalid secret key" }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_error_reply_status_is_fatal() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    let frame = json!({
        "topic": TOPIC,
        "event": "phx_reply",
        "payload": { "status": "error", "response": { "reason": "unmatched topic" } },
        "ref": "1",
    });
    orch.send_text(frame.to_string()).await;
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Protocol(ProtocolError::Orchestrator(_))
    ));
}

#[tokio::test]
async fn test_unknown_events_and_garbage_are_tolerated() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.send_text("not json at all".to_string()).await;
    orch.push("presence_diff", json!({ "joins": {} })).await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.node_index.map(|n| n.as_u32()), Some(1));
}

#[tokio::test]
async fn test_invalid_join_payload_is_fatal() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.push("join", json!({ "node_index": "first" })).await;
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Protocol(ProtocolError::InvalidPayload { .. })
    ));
}

#[tokio::test]
async fn test_leader_without_inventory_callback_fails() {
    let (listener, port) = listen().await;
    let mut registry = CallbackRegistry::new();
    registry.on_deq(pass_all).unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 0 })).await;
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Registry(RegistryError::MissingHandler("enq_request"))
    ));
}

#[tokio::test]
async fn test_connection_closed_early_is_a_transport_error() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.ws.close(None).await.unwrap();

    let err = finish(client).await.unwrap_err();
    assert!(matches!(err, FciError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_connect_failure() {
    let (listener, port) = listen().await;
    drop(listener);

    let err = finish(spawn_client(port, callbacks(&[]), SessionConfig::default()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FciError::Transport(TransportError::ConnectFailed { .. })
    ));
}

#[tokio::test]
async fn test_connect_timeout() {
    // Accepted by the kernel backlog but never upgraded
    let (_listener, port) = listen().await;
    let config = SessionConfig {
        connect_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    };

    let err = finish(spawn_client(port, callbacks(&[]), config))
        .await
        .unwrap_err();
    match err {
        FciError::Transport(TransportError::ConnectTimeout(endpoint)) => {
            assert!(!endpoint.contains("secret_key"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_heartbeats_use_phoenix_topic() {
    let (listener, port) = listen().await;
    let config = SessionConfig {
        heartbeat_interval: Some(Duration::from_millis(50)),
        ..SessionConfig::default()
    };
    let client = spawn_client(port, callbacks(&[]), config);
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;

    let heartbeat = loop {
        let frame = orch.recv_raw().await;
        if frame["event"] == "heartbeat" {
            break frame;
        }
    };
    assert_eq!(heartbeat["topic"], "phoenix");
    assert_eq!(heartbeat["payload"], json!({}));

    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;
    finish(client).await.unwrap();
}

#[tokio::test]
async fn test_invalid_api_host_fails_before_connecting() {
    let context = RunContext::builder()
        .run_key("rspec")
        .build_id("42")
        .api_host("bad host name:port")
        .secret_key("s3cret")
        .commit("c")
        .branch("b")
        .build()
        .unwrap();

    let err = OrchestrationClient::new(context, callbacks(&[]))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, FciError::Config(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn test_repeated_join_submits_inventory_once() {
    let (listener, port) = listen().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut registry = CallbackRegistry::new();
    registry
        .on_enq_request(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ["a.rb"].into_iter().collect()
        })
        .unwrap();
    registry.on_deq(pass_all).unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 0 })).await;
    orch.expect("enq").await;
    orch.push("join", json!({ "node_index": 0 })).await;
    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.node_index.map(|n| n.as_u32()), Some(0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_work_before_join_is_processed() {
    let (listener, port) = listen().await;
    let client = spawn_client(port, callbacks(&[]), SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.push("deq_request", json!({})).await;
    let request = orch.expect("deq").await;
    assert_eq!(request["payload"], json!({}));

    orch.push("deq", json!({ "tests": ["early.rb"] })).await;
    let report = orch.expect("deq").await;
    assert_eq!(report["payload"], json!({ "early.rb": { "status": "passed" } }));

    orch.reply("join", json!({ "node_index": 4 })).await;
    orch.push("deq", json!({ "tests": [] })).await;
    orch.expect_leave_and_close().await;

    let summary = finish(client).await.unwrap();
    assert_eq!(summary.batches, 1);
}

#[tokio::test]
async fn test_error_during_batch_aborts_pending_report() {
    let (listener, port) = listen().await;
    let mut registry = CallbackRegistry::new();
    registry
        .on_deq(|batch| {
            std::thread::sleep(Duration::from_millis(500));
            pass_all(batch)
        })
        .unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.push("deq", json!({ "tests": ["slow.rb"] })).await;
    orch.push("error", json!({ "reason": "build cancelled" })).await;

    // leave comes first and nothing follows it
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Protocol(ProtocolError::Orchestrator(_))
    ));
}

#[tokio::test]
async fn test_panicking_batch_callback_is_fatal() {
    let (listener, port) = listen().await;
    let mut registry = CallbackRegistry::new();
    registry
        .on_deq(|_batch| -> ResultSet { panic!("test runner crashed") })
        .unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.reply("join", json!({ "node_index": 1 })).await;
    orch.push("deq", json!({ "tests": ["a.rb"] })).await;
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Session(SessionError::CallbackFailed(_))
    ));
}

#[tokio::test]
async fn test_panicking_inventory_callback_still_leaves() {
    let (listener, port) = listen().await;
    let mut registry = CallbackRegistry::new();
    registry
        .on_enq_request(|| -> TestBatch { panic!("inventory unavailable") })
        .unwrap();
    registry.on_deq(pass_all).unwrap();

    let client = spawn_client(port, registry, SessionConfig::default());
    let mut orch = Orchestrator::accept(&listener).await;

    orch.expect("phx_join").await;
    orch.push("join", json!({ "node_index": 0 })).await;
    orch.expect_leave_and_close().await;

    let err = finish(client).await.unwrap_err();
    assert!(matches!(
        err,
        FciError::Session(SessionError::CallbackFailed(_))
    ));
}

#[tokio::test]
async fn test_secure_connect_attempts_tls_handshake() {
    let (listener, port) = listen().await;
    let config = SessionConfig {
        secure: true,
        ..SessionConfig::default()
    };
    let client = spawn_client(port, callbacks(&[]), config);

    // The TCP connection shows the wss URL was accepted; dropping it fails the handshake
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    drop(stream);

    match finish(client).await.unwrap_err() {
        FciError::Transport(TransportError::ConnectFailed { endpoint, reason }) => {
            assert!(endpoint.starts_with("wss://"), "endpoint {}", endpoint);
            assert!(!reason.contains("TLS support not compiled in"), "{}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
