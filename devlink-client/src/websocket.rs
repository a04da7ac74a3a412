//! WebSocket transport over `tokio-tungstenite`
//!
//! Each [`Transport::open`] spawns one channel task that performs the
//! handshake and then pumps frames in both directions. Outbound frames reach
//! the task through an unbounded queue that only accepts frames once the
//! handshake has completed, so nothing is ever buffered for a channel that is
//! not open yet.

use crate::lock;
use crate::transport::{Transport, TransportEvents};
use devlink_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

enum Outbound {
    Frame(String),
    Close,
}

struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl Link {
    fn shut(self) {
        self.open.store(false, Ordering::Release);
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Production [`Transport`] speaking text frames over `ws://` or `wss://`
#[derive(Default)]
pub struct WebSocketTransport {
    link: Mutex<Option<Link>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, address: &str, events: TransportEvents) {
        let (outbound, queue) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        let previous = lock(&self.link).replace(Link {
            outbound,
            open: Arc::clone(&open),
        });
        if let Some(previous) = previous {
            previous.shut();
        }

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_channel(address.to_string(), events, queue, open));
            }
            Err(_) => events.error("no Tokio runtime to run the channel on"),
        }
    }

    fn send(&self, frame: String) -> Result<()> {
        let link = lock(&self.link);
        match link.as_ref() {
            Some(link) if link.open.load(Ordering::Acquire) => link
                .outbound
                .send(Outbound::Frame(frame))
                .map_err(|_| Error::TransportUnavailable("channel task has exited".into())),
            Some(_) => Err(Error::TransportUnavailable("channel is still opening".into())),
            None => Err(Error::TransportUnavailable("channel is not open".into())),
        }
    }

    fn close(&self) {
        if let Some(link) = lock(&self.link).take() {
            link.shut();
        }
    }
}

#[tracing::instrument(name = "websocket_channel", skip_all, fields(address = %address, epoch = %events.epoch()))]
async fn run_channel(
    address: String,
    events: TransportEvents,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    let stream = tokio::select! {
        result = connect_async(address.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "handshake failed");
                events.error(e.to_string());
                return;
            }
        },
        _ = closed_while_opening(&mut queue) => {
            tracing::debug!("closed before the handshake completed");
            return;
        }
    };

    let (mut sink, mut stream) = stream.split();
    open.store(true, Ordering::Release);
    events.opened();

    loop {
        tokio::select! {
            outbound = queue.recv() => match outbound {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        open.store(false, Ordering::Release);
                        events.error(e.to_string());
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    open.store(false, Ordering::Release);
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => events.frame(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => events.frame(text),
                    Err(_) => tracing::debug!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "peer closed the channel");
                    open.store(false, Ordering::Release);
                    events.closed(true);
                    return;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    open.store(false, Ordering::Release);
                    events.error(e.to_string());
                    return;
                }
                None => {
                    open.store(false, Ordering::Release);
                    events.closed(false);
                    return;
                }
            },
        }
    }
}

/// Resolves once the owner closes (or abandons) a channel that is still
/// in its handshake.
async fn closed_while_opening(queue: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match queue.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Frame(_)) => {}
        }
    }
}
