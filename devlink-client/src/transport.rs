//! Transport seam between the connection manager and a physical channel
//!
//! A [`Transport`] owns at most one channel at a time. Opening is
//! non-blocking: the transport reports progress through the
//! [`TransportEvents`] sink handed to [`Transport::open`], and every event it
//! emits is stamped with the [`Epoch`] of the attempt that produced it. The
//! manager discards events whose epoch is no longer current, so a transport
//! never has to worry about late callbacks from a channel it already closed.
//!
//! [`crate::WebSocketTransport`] is the production implementation. Tests plug
//! in scripted transports through [`crate::ClientBuilder::with_transport`].

use devlink_core::Result;
use tokio::sync::mpsc;

/// Connection generation
///
/// Incremented each time the manager opens or tears down a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle and data events reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { clean: bool },
    Error(String),
}

/// Everything the driver task reacts to
#[derive(Debug)]
pub(crate) enum DriverEvent {
    Transport { epoch: Epoch, event: TransportEvent },
    ReconnectDue { generation: u64 },
    ConnectTimeout { epoch: Epoch },
    HealthFailed { epoch: Epoch, failures: u32 },
}

/// Event sink for one open attempt
///
/// Cheap to clone; every clone reports under the same epoch. Once the driver
/// is gone, reports are silently dropped.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<DriverEvent>,
}

impl TransportEvents {
    pub(crate) fn new(epoch: Epoch, tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// The channel is open and accepts frames
    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// One inbound text frame
    pub fn frame(&self, data: impl Into<String>) {
        self.emit(TransportEvent::Frame(data.into()));
    }

    /// The channel is gone; `clean` when the peer sent a close frame
    pub fn closed(&self, clean: bool) {
        self.emit(TransportEvent::Closed { clean });
    }

    /// Open failure or I/O error
    pub fn error(&self, cause: impl Into<String>) {
        self.emit(TransportEvent::Error(cause.into()));
    }

    /// Whether the receiving driver still exists
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(DriverEvent::Transport {
            epoch: self.epoch,
            event,
        });
    }
}

/// A physical message channel
///
/// Implementations must not block in any method. After [`Transport::close`]
/// returns, no further events may be reported for the closed channel (stale
/// reports are tolerated but ignored).
pub trait Transport: Send + Sync + 'static {
    /// Begin opening a channel to `address`, reporting through `events`
    ///
    /// Any channel from a previous `open` is abandoned. The manager calls this
    /// inside its Tokio runtime context, so `tokio::spawn` is available even
    /// when `connect` was called from a plain thread.
    fn open(&self, address: &str, events: TransportEvents);

    /// Send one text frame
    ///
    /// Fails with [`devlink_core::Error::TransportUnavailable`] unless the
    /// channel is open. Frames are never buffered for later delivery.
    fn send(&self, frame: String) -> Result<()>;

    /// Close the current channel, if any. Idempotent.
    fn close(&self);
}
