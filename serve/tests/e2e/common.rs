//! Shared helpers for e2e tests. Received frames are logged with
//! `[e2e] received: ...`; run tests with `--nocapture` to see them.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub agent_url: String,
    pub ui_url: String,
    #[allow(dead_code)]
    handle: tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    #[allow(dead_code)]
    log_dir: tempfile::TempDir,
}

/// Binds both endpoints to random ports and spawns the coordinator with a
/// noop summarizer and a temp run log.
pub async fn spawn_server() -> TestServer {
    let agent_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ui_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let agent_url = format!("ws://{}", agent_listener.local_addr().unwrap());
    let ui_url = format!("ws://{}", ui_listener.local_addr().unwrap());
    let log_dir = tempfile::tempdir().unwrap();
    let options = serve::ServeOptions {
        summarizer: Arc::new(tether::NoopSummarizer),
        log_dir: log_dir.path().to_path_buf(),
    };
    let handle = tokio::spawn(serve::run_serve_on_listeners(
        agent_listener,
        ui_listener,
        options,
    ));
    TestServer {
        agent_url,
        ui_url,
        handle,
        log_dir,
    }
}

pub async fn connect(url: &str) -> Socket {
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

pub async fn send(socket: &mut Socket, value: &Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping heartbeat frames. Panics after 5s.
pub async fn recv_json(socket: &mut Socket) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timeout waiting for frame")
            .expect("connection closed")
            .unwrap();
        match msg {
            Message::Text(t) => {
                eprintln!("[e2e] received: {t}");
                return serde_json::from_str(&t).unwrap();
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts that no text frame arrives within the window (heartbeats are
/// fine). Used to show the agent was *not* resumed.
pub async fn assert_silent(socket: &mut Socket, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, socket.next()).await {
            Err(_) => return, // window elapsed quietly
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(Message::Text(t)))) => panic!("expected silence, got: {t}"),
            Ok(other) => panic!("expected silence, got: {other:?}"),
        }
    }
}

/// Waits for the socket to be closed by the server, skipping any frames
/// still in flight. Returns the close reason when one was carried.
pub async fn recv_close(socket: &mut Socket) -> Option<String> {
    loop {
        let msg = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            None => return None,
            Some(Err(_)) => return None,
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.reason.into_owned()),
            Some(Ok(_)) => continue,
        }
    }
}

pub fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

pub fn text_payload(text: &str) -> Value {
    json!({"kind": "text", "value": text})
}

pub fn json_payload(value: Value) -> Value {
    json!({"kind": "json", "value": value})
}

pub fn event_msg(event_id: &str, event_type: &str, payload: Value) -> Value {
    json!({
        "message": "event",
        "data": {
            "event_id": event_id,
            "event_type": event_type,
            "payload": payload,
            "sent_at": now_iso(),
        }
    })
}

pub fn breakpoint_msg(uuid: &str, event_id: &str, phase: &str, original: Value) -> Value {
    json!({
        "message": "breakpoint",
        "data": {
            "uuid": uuid,
            "event_id": event_id,
            "phase": phase,
            "original_data": original,
            "sent_at": now_iso(),
        }
    })
}

pub fn ui_cmd(name: &str, content: Value) -> Value {
    json!({"event": name, "content": content})
}

/// Connects both peers and starts a run named `demo`; consumes the UI's
/// `init_app_state`, `new_run` and first `update_run_state`. Returns
/// `(agent, ui, run_uuid)`.
pub async fn start_run(server: &TestServer) -> (Socket, Socket, String) {
    let mut ui = connect(&server.ui_url).await;
    let init = recv_json(&mut ui).await;
    assert_eq!(init["event"], "init_app_state");

    let mut agent = connect(&server.agent_url).await;
    send(
        &mut agent,
        &event_msg("e1", "PROGRAM_STARTED", text_payload("demo")),
    )
    .await;

    let new_run = recv_json(&mut ui).await;
    assert_eq!(new_run["event"], "new_run");
    assert_eq!(new_run["content"]["run"]["program_name"], "demo");
    let run = new_run["content"]["run"]["uuid"]
        .as_str()
        .unwrap()
        .to_string();

    let update = recv_json(&mut ui).await;
    assert_eq!(update["event"], "update_run_state");
    assert_eq!(update["content"]["state"], "STEP");
    assert_eq!(update["content"]["agent_state"], "AGENT_RUNNING");

    (agent, ui, run)
}

/// From a started run: report an LLM_QUERY event `e2` and halt on its
/// `begin` breakpoint `b1`. Consumes the UI traffic up to the halt.
pub async fn halt_at_first_breakpoint(agent: &mut Socket, ui: &mut Socket, run: &str) {
    send(
        agent,
        &event_msg("e2", "LLM_QUERY", json_payload(json!({"prompt": "p"}))),
    )
    .await;
    let update = recv_json(ui).await;
    assert_eq!(update["event"], "update_run_state");
    assert_eq!(update["content"]["agent_state"], "AGENT_RUNNING");

    send(
        agent,
        &breakpoint_msg("b1", "e2", "begin", json_payload(json!({"prompt": "p"}))),
    )
    .await;
    let message = recv_json(ui).await;
    assert_eq!(message["event"], "new_message");
    assert_eq!(message["content"]["message"]["uuid"], "b1");

    let update = recv_json(ui).await;
    assert_eq!(update["event"], "update_run_state");
    assert_eq!(update["content"]["run"], run);
    assert_eq!(update["content"]["state"], "HALTED");
    assert_eq!(update["content"]["agent_state"], "HALTED");
    assert_eq!(update["content"]["halted_at"], "b1");
}
