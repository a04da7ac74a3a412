//! Common test utilities for devlink-client integration tests
//!
//! `MockTransport` is an in-memory transport the tests drive directly: it
//! opens instantly (or refuses), records every outbound frame, can answer
//! calls through a responder, and can push frames or drop the channel on
//! demand. `MockWsServer` is a real WebSocket server on localhost for the
//! tests that exercise the default transport.

#![allow(dead_code)]

use devlink_client::{
    ClientBuilder, ConnectionEvent, ConnectionManager, ConnectionState, FixedDelay, Transport,
    TransportEvents,
};
use devlink_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const ADDRESS: &str = "mock://camera-rig";

type Responder = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Scriptable in-memory transport
#[derive(Default)]
pub struct MockTransport {
    events: Mutex<Option<TransportEvents>>,
    previous: Mutex<Option<TransportEvents>>,
    responder: Mutex<Option<Responder>>,
    refuse: Mutex<bool>,
    sent: Mutex<Vec<String>>,
    opens: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose peer answers calls with `responder`
    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        let transport = Self::default();
        *transport.responder.lock().unwrap() = Some(Box::new(responder));
        Arc::new(transport)
    }

    /// Make every open attempt fail with a transport error
    pub fn refuse_opens(&self, refuse: bool) {
        *self.refuse.lock().unwrap() = refuse;
    }

    /// Deliver an inbound frame on the current channel
    pub fn emit(&self, frame: impl Into<String>) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.frame(frame);
        }
    }

    /// Simulate the peer going away without a close handshake
    pub fn drop_connection(&self) {
        if let Some(events) = self.events.lock().unwrap().take() {
            events.closed(false);
            *self.previous.lock().unwrap() = Some(events);
        }
    }

    /// Deliver a frame on the channel that was open before the last drop
    pub fn emit_on_previous(&self, frame: impl Into<String>) {
        if let Some(events) = self.previous.lock().unwrap().as_ref() {
            events.frame(frame);
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Outbound frames parsed as JSON
    pub fn sent_requests(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent_requests()
            .iter()
            .map(|request| request["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }
}

impl Transport for MockTransport {
    fn open(&self, _address: &str, events: TransportEvents) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if *self.refuse.lock().unwrap() {
            events.error("connection refused");
            return;
        }
        events.opened();
        *self.events.lock().unwrap() = Some(events);
    }

    fn send(&self, frame: String) -> Result<()> {
        let events = self.events.lock().unwrap();
        let Some(events) = events.as_ref() else {
            return Err(Error::TransportUnavailable("channel closed".into()));
        };
        self.sent.lock().unwrap().push(frame.clone());

        let request: Value = serde_json::from_str(&frame).unwrap();
        if let Some(responder) = self.responder.lock().unwrap().as_ref() {
            if let Some(response) = responder(&request) {
                events.frame(response);
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.events.lock().unwrap().take();
    }
}

/// Answers `ping` with `"pong"` and echoes the params of anything else
pub fn echo_responder(request: &Value) -> Option<String> {
    let id = request["id"].as_u64()?;
    match request["method"].as_str()? {
        "ping" => Some(mock_response(id, Value::from("pong"))),
        _ => Some(mock_response(id, request["params"].clone())),
    }
}

/// Builder wired to `transport` with health checks off and a short fixed
/// reconnect delay
pub fn builder(transport: Arc<MockTransport>) -> ClientBuilder {
    ClientBuilder::new()
        .with_transport(transport)
        .with_reconnect(Box::new(FixedDelay::new(Duration::from_millis(100))))
        .without_health_checks()
}

pub async fn connect(builder: ClientBuilder) -> ConnectionManager {
    let manager = builder.build().unwrap();
    manager.connect(ADDRESS).unwrap();
    manager.wait_until_connected().await.unwrap();
    manager
}

/// Receive events until one matches
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    predicate: F,
) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Receive events until the state changes to one matching `predicate`
pub async fn wait_for_state<F>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    predicate: F,
) -> ConnectionState
where
    F: Fn(&ConnectionState) -> bool,
{
    match wait_for_event(events, |event| {
        matches!(event, ConnectionEvent::StateChanged { to, .. } if predicate(to))
    })
    .await
    {
        ConnectionEvent::StateChanged { to, .. } => to,
        other => unreachable!("unexpected event {:?}", other),
    }
}

/// Helper to create a mock JSON-RPC response
pub fn mock_response(id: u64, result: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id
    })
    .to_string()
}

/// Helper to create a mock JSON-RPC error response
pub fn mock_error_response(id: u64, code: i32, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message
        },
        "id": id
    })
    .to_string()
}

/// Helper to create a mock JSON-RPC notification
pub fn mock_notification(method: &str, params: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
    .to_string()
}

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close,
}

/// Mock WebSocket server for exercising the real transport
///
/// Answers inbound text frames through a handler and can push frames or
/// close every connected client.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    push_tx: broadcast::Sender<Push>,
    message_rx: mpsc::Receiver<String>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a server that answers with [`echo_responder`]
    pub async fn new() -> Self {
        Self::with_handler(|text| {
            let request: Value = serde_json::from_str(&text).ok()?;
            echo_responder(&request)
        })
        .await
    }

    /// Start a server with a custom message handler
    ///
    /// The handler receives every inbound text frame and returns the reply,
    /// if any.
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(String) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (msg_tx, message_rx) = mpsc::channel::<String>(100);
        let (push_tx, _) = broadcast::channel::<Push>(16);
        let connections = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let accept_push = push_tx.clone();
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        let msg_tx = msg_tx.clone();
                        let handler = Arc::clone(&handler);
                        let mut pushes = accept_push.subscribe();
                        accepted.fetch_add(1, Ordering::SeqCst);

                        tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    inbound = read.next() => {
                                        let Some(Ok(message)) = inbound else { break };
                                        if let Message::Text(text) = message {
                                            let _ = msg_tx.send(text.clone()).await;
                                            if let Some(reply) = handler(text) {
                                                let _ = write.send(Message::Text(reply)).await;
                                            }
                                        }
                                    }
                                    push = pushes.recv() => match push {
                                        Ok(Push::Text(text)) => {
                                            let _ = write.send(Message::Text(text)).await;
                                        }
                                        Ok(Push::Close) | Err(_) => {
                                            let _ = write.send(Message::Close(None)).await;
                                            break;
                                        }
                                    },
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            push_tx,
            message_rx,
            connections,
        }
    }

    /// Get the WebSocket URL for connecting to this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a frame to every connected client
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(Push::Text(text.into()));
    }

    /// Close every connected client with a close frame
    pub fn close_clients(&self) {
        let _ = self.push_tx.send(Push::Close);
    }

    /// Wait for the next inbound text frame
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
