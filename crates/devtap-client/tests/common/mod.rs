//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Server end of a scripted DevTools WebSocket.
pub type BrowserSocket = WebSocketStream<TcpStream>;

/// A one-connection WebSocket server driven by a test script.
pub struct MockBrowser {
    pub url: String,
    pub task: JoinHandle<()>,
}

/// Bind on an ephemeral port and run `script` against the first client.
pub async fn spawn_browser<F, Fut>(script: F) -> MockBrowser
where
    F: FnOnce(BrowserSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind mock browser");
    let addr = listener.local_addr().expect("should have local addr");
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("should accept client");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("should complete WebSocket handshake");
        script(ws).await;
    });
    MockBrowser {
        url: format!("ws://{addr}/devtools/page/MOCK"),
        task,
    }
}

/// Next command from the client, or `None` once it closes.
pub async fn next_command(ws: &mut BrowserSocket) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

pub async fn send_json(ws: &mut BrowserSocket, value: &Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("should send to client");
}

/// Answer `command` with a successful `result`.
pub async fn reply(ws: &mut BrowserSocket, command: &Value, result: Value) {
    send_json(ws, &json!({ "id": command["id"], "result": result })).await;
}

/// Read commands until the client closes, returning their methods.
pub async fn drain_methods(ws: &mut BrowserSocket) -> Vec<String> {
    let mut methods = Vec::new();
    while let Some(cmd) = next_command(ws).await {
        methods.push(cmd["method"].as_str().unwrap_or_default().to_owned());
    }
    methods
}
