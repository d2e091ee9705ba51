//! # Transport
//!
//! The duplex channel the connection manager drives, and its WebSocket
//! implementation.
//!
//! ## Transport Boundary
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connection ⇄ Transport                             │
//! │                                                                         │
//! │   Connection                                 Transport                  │
//! │   ──────────                                 ─────────                  │
//! │   go_online()   ─── open(EventSink) ───────►  start socket task         │
//! │   send()        ─── send(text) ────────────►  enqueue frame             │
//! │   go_offline()  ─── close() ───────────────►  close socket              │
//! │                                                                         │
//! │   event loop    ◄── Opened ──────────────────  handshake complete       │
//! │                 ◄── Message(text) ───────────  text frame received      │
//! │                 ◄── Errored(reason) ─────────  socket failure           │
//! │                 ◄── Closed ──────────────────  socket gone (once)       │
//! │                                                                         │
//! │  Every notification is tagged with the epoch of the open() call that   │
//! │  produced it, so a late Closed from an old socket cannot take a newer  │
//! │  one offline.                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no automatic reconnect here. A closed socket stays closed until
//! the caller asks the connection to go online again.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

// =============================================================================
// Transport Events
// =============================================================================

/// Notifications a transport delivers to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open and frames can be written.
    Opened,
    /// The channel is gone.
    Closed,
    /// The channel failed. A `Closed` follows.
    Errored(String),
    /// A text frame arrived.
    Message(String),
}

/// Delivers [`TransportEvent`]s for one `open()` call.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        EventSink { epoch, tx }
    }

    /// Queues an event for the connection's event loop.
    ///
    /// Returns false once the connection is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }

    /// The epoch this sink was issued for.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

// =============================================================================
// Transport Trait
// =============================================================================

/// A duplex text channel to the store.
///
/// Implementations must not call back into the connection from `send` or
/// `close`: every notification goes through the [`EventSink`].
pub trait Transport: Send + Sync {
    /// Starts opening a channel. Completion is reported as `Opened`.
    fn open(&self, events: EventSink) -> ClientResult<()>;

    /// Writes one frame without blocking.
    ///
    /// Fails with [`ClientError::NotConnected`] when no channel is open.
    fn send(&self, frame: &str) -> ClientResult<()>;

    /// Closes the channel if one is open.
    fn close(&self);

    /// Returns true while a channel is open or opening.
    fn is_open(&self) -> bool;
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Builds the transport settings from a client config.
    pub fn from_client_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(TransportConfig {
            url: config.store_url()?.to_string(),
            connect_timeout: config.connect_timeout(),
            ping_interval: config.ping_interval(),
        })
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

enum Command {
    Frame(String),
    Close,
}

/// WebSocket transport.
///
/// Each `open()` spawns one socket task on the current tokio runtime.
/// Frames are handed to that task over an unbounded channel, so `send`
/// never blocks.
///
/// ## Usage
/// ```rust,ignore
/// let transport = WebSocketTransport::new(TransportConfig {
///     url: "ws://localhost:4000/ws".into(),
///     ..Default::default()
/// });
/// let connection = Connection::new(config, Arc::new(transport))?;
/// ```
pub struct WebSocketTransport {
    config: TransportConfig,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl WebSocketTransport {
    /// Creates a closed transport.
    pub fn new(config: TransportConfig) -> Self {
        WebSocketTransport {
            config,
            commands: Mutex::new(None),
        }
    }

    /// The URL this transport connects to.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, events: EventSink) -> ClientResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::NoRuntime(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(previous) = self.commands.lock().replace(tx) {
            let _ = previous.send(Command::Close);
        }

        runtime.spawn(run_socket(self.config.clone(), rx, events));
        Ok(())
    }

    fn send(&self, frame: &str) -> ClientResult<()> {
        match self.commands.lock().as_ref() {
            Some(tx) => tx
                .send(Command::Frame(frame.to_string()))
                .map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    fn close(&self) {
        if let Some(tx) = self.commands.lock().take() {
            let _ = tx.send(Command::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.commands
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

/// One socket's lifetime: connect, pump frames, report `Closed` once.
async fn run_socket(
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
) {
    info!(url = %config.url, epoch = events.epoch(), "Transport connecting");

    match connect_with_timeout(&config).await {
        Ok(ws_stream) => {
            info!(url = %config.url, "WebSocket connected");
            events.emit(TransportEvent::Opened);

            if let Err(e) = connection_loop(ws_stream, &mut commands, &events, config.ping_interval).await {
                warn!(?e, "Connection loop ended with error");
                events.emit(TransportEvent::Errored(e.to_string()));
            }
        }
        Err(e) => {
            error!(?e, url = %config.url, "Failed to connect");
            events.emit(TransportEvent::Errored(e.to_string()));
        }
    }

    events.emit(TransportEvent::Closed);
    info!(url = %config.url, "Transport stopped");
}

/// Connects with timeout.
async fn connect_with_timeout(
    config: &TransportConfig,
) -> ClientResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((ws_stream, response))) => {
            debug!(status = ?response.status(), "WebSocket handshake complete");
            Ok(ws_stream)
        }
        Ok(Err(e)) => Err(ClientError::from(e)),
        Err(_) => Err(ClientError::Timeout(config.connect_timeout.as_secs())),
    }
}

/// Main connection loop - handles sending and receiving.
async fn connection_loop(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &EventSink,
    ping_every: Duration,
) -> ClientResult<()> {
    let (mut write, mut read) = ws_stream.split();

    let mut ping_interval = tokio::time::interval(ping_every);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Frame(frame)) => {
                        debug!(bytes = frame.len(), "Sending frame");
                        write.send(WsMessage::Text(frame.into())).await?;
                    }
                    Some(Command::Close) | None => {
                        info!("Closing WebSocket");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(());
                    }
                }
            }

            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !events.emit(TransportEvent::Message(text.as_str().to_owned())) {
                            debug!("Connection dropped, stopping transport");
                            return Ok(());
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        debug!("Received pong");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Received close frame");
                        return Ok(());
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Received unexpected binary message");
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket error");
                        return Err(ClientError::from(e));
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(());
                    }
                }
            }

            _ = ping_interval.tick() => {
                write.send(WsMessage::Ping(Vec::<u8>::new().into())).await?;
                debug!("Sent ping");
            }
        }
    }
}
