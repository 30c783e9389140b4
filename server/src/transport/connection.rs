//! WebSocket Connection
//!
//! One duplex socket driven by a reader loop and a writer task. Outbound frames
//! go through a bounded queue; the writer interleaves them with keepalive pings.
//! Either side failing tears down both and the owner is told exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer sent a frame type we do not accept.
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// The peer sent text we could not decode.
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// The peer could not keep up with outbound traffic.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Timing and sizing for connection loops.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Deadline for a single write, and for waiting on queue capacity.
    pub write_wait: Duration,
    /// Maximum read idle time.
    pub pong_wait: Duration,
    /// Interval between keepalive pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest accepted inbound message.
    pub max_message_size: usize,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl ConnectionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            write_wait: config.write_wait,
            pong_wait: config.pong_wait,
            ping_period: config.ping_period(),
            max_message_size: config.max_message_size,
            send_queue_capacity: config.send_queue_capacity,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default_for_test())
    }
}

/// Receiving half of a connection's outbound queue, consumed by the writer.
pub type Outbox = mpsc::Receiver<String>;

/// Shared handle to one real-time connection.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::Sender<String>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    close_reason: OnceLock<(u16, String)>,
    write_wait: Duration,
}

impl Connection {
    /// Create a connection and its outbox.
    ///
    /// The outbox is handed to [`serve`]; tests may read it directly.
    #[must_use]
    pub fn new(settings: &ConnectionSettings) -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::channel(settings.send_queue_capacity);
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            close_reason: OnceLock::new(),
            write_wait: settings.write_wait,
        });
        (conn, rx)
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a text frame.
    ///
    /// No-op once closed. Waits at most `write_wait` for queue capacity, then
    /// closes the connection as a slow consumer.
    pub async fn send(&self, text: String) {
        if self.is_closed() {
            return;
        }
        match timeout(self.write_wait, self.tx.send(text)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => self.close(),
            Err(_) => {
                warn!(conn_id = %self.id, "Outbound queue full, dropping slow consumer");
                self.close_with(CLOSE_POLICY_VIOLATION, "slow consumer");
            }
        }
    }

    /// Serialize `value` as JSON and queue it.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(text) => self.send(text).await,
            Err(e) => error!(conn_id = %self.id, error = %e, "Failed to serialize message"),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// For use inside the hub and room loops, which must never block on one
    /// peer. A full queue closes the connection as a slow consumer.
    pub fn offer(&self, text: String) {
        if self.is_closed() {
            return;
        }
        match self.tx.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => self.close(),
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Outbound queue full, dropping slow consumer");
                self.close_with(CLOSE_POLICY_VIOLATION, "slow consumer");
            }
        }
    }

    /// Serialize `value` as JSON and [`offer`](Self::offer) it.
    pub fn offer_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(text) => self.offer(text),
            Err(e) => error!(conn_id = %self.id, error = %e, "Failed to serialize message"),
        }
    }

    /// Close with a normal closure code.
    pub fn close(&self) {
        self.close_with(CLOSE_NORMAL, "");
    }

    /// Close with an explicit code and reason. Only the first call has effect.
    pub fn close_with(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.close_reason.set((code, reason.to_string()));
        self.shutdown.cancel();
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    fn close_frame(&self) -> CloseFrame {
        let (code, reason) = self
            .close_reason
            .get()
            .cloned()
            .unwrap_or((CLOSE_NORMAL, String::new()));
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }
}

/// The component a connection reports to: the signaling hub or a call.
#[async_trait]
pub trait ConnectionOwner: Send + Sync + 'static {
    /// Decoded inbound message.
    type Message: Send;

    /// Decode one text frame. Failure closes the connection.
    fn decode(text: &str) -> Result<Self::Message, serde_json::Error>;

    /// Handle one decoded message from `conn`.
    async fn dispatch(&self, conn: &Arc<Connection>, message: Self::Message);

    /// `conn` is gone. Called once per served connection.
    async fn unregister(&self, conn: &Arc<Connection>);
}

/// Drive `socket` until either side ends, then unregister from `owner`.
pub async fn serve<O: ConnectionOwner>(
    conn: Arc<Connection>,
    outbox: Outbox,
    socket: WebSocket,
    owner: Arc<O>,
    settings: ConnectionSettings,
) {
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(conn.clone(), outbox, sink, settings.clone()));

    loop {
        let next = tokio::select! {
            () = conn.shutdown.cancelled() => break,
            next = timeout(settings.pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                debug!(conn_id = %conn.id, "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id, error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => match O::decode(text.as_str()) {
                Ok(message) => owner.dispatch(&conn, message).await,
                Err(e) => {
                    warn!(conn_id = %conn.id, error = %e, "Malformed message");
                    conn.close_with(CLOSE_INVALID_PAYLOAD, "malformed message");
                    break;
                }
            },
            Message::Binary(_) => {
                warn!(conn_id = %conn.id, "Rejecting binary frame");
                conn.close_with(CLOSE_UNSUPPORTED_DATA, "unsupported binary message");
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    conn.close();
    owner.unregister(&conn).await;
    let _ = writer.await;
    debug!(conn_id = %conn.id, "Connection finished");
}

async fn write_loop(
    conn: Arc<Connection>,
    mut outbox: Outbox,
    mut sink: SplitSink<WebSocket, Message>,
    settings: ConnectionSettings,
) {
    let mut ping = interval_at(
        Instant::now() + settings.ping_period,
        settings.ping_period,
    );

    loop {
        tokio::select! {
            () = conn.shutdown.cancelled() => break,
            frame = outbox.recv() => {
                let Some(text) = frame else { break };
                if !write(&mut sink, Message::Text(text.into()), settings.write_wait).await {
                    conn.close();
                    return;
                }
            }
            _ = ping.tick() => {
                if !write(&mut sink, Message::Ping(Vec::new().into()), settings.write_wait).await {
                    conn.close();
                    return;
                }
            }
        }
    }

    // Flush what was queued before the close, then say goodbye.
    while let Ok(text) = outbox.try_recv() {
        if !write(&mut sink, Message::Text(text.into()), settings.write_wait).await {
            return;
        }
    }
    let frame = conn.close_frame();
    let _ = write(&mut sink, Message::Close(Some(frame)), settings.write_wait).await;
    let _ = sink.close().await;
}

async fn write(sink: &mut SplitSink<WebSocket, Message>, message: Message, wait: Duration) -> bool {
    matches!(timeout(wait, sink.send(message)).await, Ok(Ok(())))
}
