//! # Connection Manager
//!
//! One socket shared by every client handle, with an offline queue and the
//! dispatch of inbound frames.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Connection Lifecycle                             │
//! │                                                                         │
//! │   ┌─────────┐  go_online() /         ┌────────────┐  Opened  ┌───────┐ │
//! │   │ Offline │  first send() ───────► │ Connecting │ ───────► │Online │ │
//! │   └─────────┘                        └────────────┘          └───────┘ │
//! │        ▲                                   │                     │      │
//! │        │         open() failed             │                     │      │
//! │        ├───────────────────────────────────┘                     │      │
//! │        │         Closed / go_offline()                           │      │
//! │        └─────────────────────────────────────────────────────────┘      │
//! │                                                                         │
//! │  OFFLINE / CONNECTING                      ONLINE                       │
//! │  ────────────────────                      ──────                       │
//! │  send() appends to the queue               send() writes to the socket │
//! │  Opened flushes the queue in FIFO order, before any later send()      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Epochs
//! Every `go_online()` and `go_offline()` bumps an epoch, and the transport
//! tags its notifications with the epoch of the `open()` that produced
//! them. Notifications from an older epoch are dropped, so a socket that
//! was replaced cannot take the connection offline.
//!
//! ## Dispatch
//! Inbound frames are handled on one background task per connection, in
//! arrival order. Acks go to the [`AckRouter`], events to the
//! [`ListenerRegistry`]. A malformed frame is logged and dropped.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use turbo_core::{ConnectionState, EventKind, Path};
use url::Url;

use crate::ack::{AckReply, AckRouter};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::listener::{Callback, CancelCallback, ListenerIdentity, ListenerRegistry, Removal};
use crate::protocol::{EventFrame, Request, Response};
use crate::snapshot::Snapshot;
use crate::transport::{EventSink, Transport, TransportConfig, TransportEvent, WebSocketTransport};

// =============================================================================
// Connection Status
// =============================================================================

/// Point-in-time view of a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,

    /// Normalized store URL.
    pub url: String,

    /// Frames waiting for the socket.
    pub queued: usize,

    /// Requests waiting for an ack.
    pub pending_acks: usize,

    /// Registered listeners across all handles.
    pub listeners: usize,

    /// Whether a session token is held.
    pub authenticated: bool,

    /// When the connection last went online.
    pub last_connected: Option<DateTime<Utc>>,

    /// Last transport error.
    pub last_error: Option<String>,
}

// =============================================================================
// Connection Observer
// =============================================================================

/// Receives connection lifecycle notifications.
pub trait ConnectionObserver: Send + Sync {
    /// Called after every state transition.
    fn on_state_change(&self, state: ConnectionState, url: &str);

    /// Called when the transport fails.
    fn on_error(&self, error: &ClientError);
}

/// Observer that ignores everything.
pub struct NoOpObserver;

impl ConnectionObserver for NoOpObserver {
    fn on_state_change(&self, _state: ConnectionState, _url: &str) {}
    fn on_error(&self, _error: &ClientError) {}
}

// =============================================================================
// Connection
// =============================================================================

struct Link {
    state: ConnectionState,
    epoch: u64,
    queue: VecDeque<String>,
    /// Set by `go_offline()`; suppresses auto-connect until `go_online()`.
    manual_offline: bool,
    last_connected: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Inner {
    config: ClientConfig,
    url: Url,
    transport: Arc<dyn Transport>,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    acks: AckRouter,
    listeners: ListenerRegistry,
    auth_token: Mutex<Option<String>>,
    observer: Arc<dyn ConnectionObserver>,
}

/// Shared connection to one store.
///
/// Cheap to clone; every clone drives the same socket. Must be created
/// inside a tokio runtime, which runs the dispatch task.
///
/// ## Usage
/// ```rust,ignore
/// let (transport, peer) = MemoryTransport::pair();
/// let connection = Connection::new(ClientConfig::default(), Arc::new(transport))?;
/// let root = Client::new(&connection);
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates an offline connection over `transport`.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientResult<Self> {
        Self::with_observer(config, transport, Arc::new(NoOpObserver))
    }

    /// Creates an offline connection that reports to `observer`.
    pub fn with_observer(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let url = config.store_url()?;
        let runtime = Handle::try_current().map_err(|e| ClientError::NoRuntime(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Offline);

        let inner = Arc::new(Inner {
            config,
            url,
            transport,
            link: Mutex::new(Link {
                state: ConnectionState::Offline,
                epoch: 0,
                queue: VecDeque::new(),
                manual_offline: false,
                last_connected: None,
                last_error: None,
            }),
            state_tx,
            events_tx,
            acks: AckRouter::new(),
            listeners: ListenerRegistry::new(),
            auth_token: Mutex::new(None),
            observer,
        });

        runtime.spawn(event_loop(Arc::downgrade(&inner), events_rx));
        info!(url = %inner.url, "Connection created");

        Ok(Connection { inner })
    }

    /// Creates a connection over a WebSocket to the configured store.
    pub fn websocket(config: ClientConfig) -> ClientResult<Self> {
        let transport = WebSocketTransport::new(TransportConfig::from_client_config(&config)?);
        Self::new(config, Arc::new(transport))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Normalized store URL.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Returns a snapshot of the connection's bookkeeping.
    pub fn status(&self) -> ConnectionStatus {
        let link = self.inner.link.lock();
        ConnectionStatus {
            state: link.state,
            url: self.inner.url.to_string(),
            queued: link.queue.len(),
            pending_acks: self.inner.acks.pending_count(),
            listeners: self.inner.listeners.len(),
            authenticated: self.inner.auth_token.lock().is_some(),
            last_connected: link.last_connected,
            last_error: link.last_error.clone(),
        }
    }

    /// Subscribes to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Waits until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> ClientResult<()> {
        let mut rx = self.inner.state_tx.subscribe();
        let reached = rx.wait_for(|current| *current == state).await.map(|_| ());
        reached.map_err(|_| ClientError::ChannelError("connection state channel closed".into()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the socket. Does nothing unless the connection is offline.
    ///
    /// Also re-enables auto-connect after [`go_offline`](Self::go_offline).
    pub fn go_online(&self) -> ClientResult<()> {
        let epoch = {
            let mut link = self.inner.link.lock();
            link.manual_offline = false;
            if link.state != ConnectionState::Offline {
                return Ok(());
            }
            link.epoch += 1;
            link.state = ConnectionState::Connecting;
            self.inner.state_tx.send_replace(ConnectionState::Connecting);
            link.epoch
        };

        info!(url = %self.inner.url, epoch, "Connecting to store");
        self.notify_state(ConnectionState::Connecting);

        let sink = EventSink::new(epoch, self.inner.events_tx.clone());
        if let Err(e) = self.inner.transport.open(sink) {
            error!(?e, url = %self.inner.url, "Transport failed to open");
            let reverted = {
                let mut link = self.inner.link.lock();
                link.last_error = Some(e.to_string());
                if link.epoch == epoch && link.state == ConnectionState::Connecting {
                    link.state = ConnectionState::Offline;
                    self.inner.state_tx.send_replace(ConnectionState::Offline);
                    true
                } else {
                    false
                }
            };
            if reverted {
                self.notify_state(ConnectionState::Offline);
            }
            self.inner.observer.on_error(&e);
            return Err(e);
        }

        Ok(())
    }

    /// Closes the socket. Does nothing if already offline.
    ///
    /// Queued frames are kept and auto-connect is suspended until the next
    /// [`go_online`](Self::go_online).
    pub fn go_offline(&self) {
        let previous = {
            let mut link = self.inner.link.lock();
            link.manual_offline = true;
            if link.state == ConnectionState::Offline {
                return;
            }
            let previous = link.state;
            link.epoch += 1;
            link.state = ConnectionState::Offline;
            self.inner.state_tx.send_replace(ConnectionState::Offline);
            previous
        };

        self.inner.transport.close();
        info!(url = %self.inner.url, %previous, "Went offline");
        self.notify_state(ConnectionState::Offline);
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Sends a frame, or queues it if the socket is not online.
    ///
    /// Queuing on an offline connection triggers a connect when
    /// auto-connect is enabled.
    pub(crate) fn send(&self, request: &Request) -> ClientResult<()> {
        let frame = request.to_json()?;

        let connect = {
            let mut link = self.inner.link.lock();
            if link.state == ConnectionState::Online {
                debug!(cmd = request.cmd(), ack = ?request.ack(), "Sending frame");
                let Err(e) = self.inner.transport.send(&frame) else {
                    return Ok(());
                };

                // The socket went away before its Closed notification arrived.
                link.queue.push_back(frame);
                self.drop_link(&mut link, &e);
                drop(link);
                self.after_drop_link(&e);
                return Ok(());
            }

            link.queue.push_back(frame);
            debug!(
                cmd = request.cmd(),
                state = %link.state,
                queued = link.queue.len(),
                "Queued frame"
            );
            link.state == ConnectionState::Offline
                && !link.manual_offline
                && self.inner.config.connection.auto_connect
        };

        if connect {
            if let Err(e) = self.go_online() {
                warn!(?e, "Auto-connect failed, frame stays queued");
            }
        }
        Ok(())
    }

    /// Sends an acknowledged request built around a fresh ack id.
    ///
    /// If the frame cannot be sent, `on_reply` receives the error and the
    /// same error is returned.
    pub(crate) fn request<B, F>(&self, build: B, on_reply: F) -> ClientResult<u64>
    where
        B: FnOnce(u64) -> Request,
        F: FnOnce(ClientResult<AckReply>) + Send + 'static,
    {
        let id = self.inner.acks.next_id();
        let request = build(id);
        self.inner.acks.register(id, Box::new(on_reply))?;

        if let Err(e) = self.send(&request) {
            self.inner.acks.abort(id, e.clone());
            return Err(e);
        }
        Ok(id)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Registers a listener and sends the subscribe frame.
    pub(crate) fn listen(
        &self,
        path: &Path,
        kind: EventKind,
        identity: ListenerIdentity,
        callback: Callback,
        cancel: Option<CancelCallback>,
    ) -> ClientResult<()> {
        let replaced = self.inner.listeners.insert(
            path.clone(),
            kind,
            identity.clone(),
            callback.clone(),
            cancel,
        );

        let subscribe = Request::On {
            path: path.clone(),
            event_type: kind,
        };
        if let Err(e) = self.send(&subscribe) {
            if !replaced {
                let _ = self.inner.listeners.remove(path, kind, &identity, &callback);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes a listener. The unsubscribe frame goes out once no listener
    /// remains at (path, kind).
    pub(crate) fn unlisten(
        &self,
        path: &Path,
        kind: EventKind,
        identity: &ListenerIdentity,
        callback: &Callback,
    ) -> ClientResult<()> {
        match self.inner.listeners.remove(path, kind, identity, callback)? {
            Removal::Removed { last: true } => self.send(&Request::Off {
                path: path.clone(),
                event_type: kind,
            }),
            Removal::Removed { last: false } | Removal::Missing => Ok(()),
        }
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// The session token from the last successful `auth`.
    pub fn auth_token(&self) -> Option<String> {
        self.inner.auth_token.lock().clone()
    }

    pub(crate) fn set_auth_token(&self, token: Option<String>) {
        *self.inner.auth_token.lock() = token;
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_event(&self, epoch: u64, event: TransportEvent) {
        if epoch != self.inner.link.lock().epoch {
            debug!(epoch, "Dropping notification from a replaced socket");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(epoch),
            TransportEvent::Closed => self.on_closed(epoch),
            TransportEvent::Errored(reason) => self.on_errored(reason),
            TransportEvent::Message(text) => self.dispatch(&text),
        }
    }

    fn on_opened(&self, epoch: u64) {
        let (flushed, remaining, failure) = {
            let mut link = self.inner.link.lock();
            if link.epoch != epoch || link.state != ConnectionState::Connecting {
                return;
            }
            link.state = ConnectionState::Online;
            link.last_connected = Some(Utc::now());
            self.inner.state_tx.send_replace(ConnectionState::Online);

            let mut flushed = 0usize;
            let mut failure = None;
            while let Some(frame) = link.queue.pop_front() {
                if let Err(e) = self.inner.transport.send(&frame) {
                    link.queue.push_front(frame);
                    self.drop_link(&mut link, &e);
                    failure = Some(e);
                    break;
                }
                flushed += 1;
            }
            (flushed, link.queue.len(), failure)
        };

        self.notify_state(ConnectionState::Online);
        match failure {
            None => info!(url = %self.inner.url, flushed, remaining, "Connection online"),
            Some(e) => {
                warn!(?e, flushed, remaining, "Flush interrupted, keeping the rest queued");
                self.after_drop_link(&e);
            }
        }
    }

    /// Takes an online link offline after a failed write. Frames stay
    /// queued for the next `go_online()`. Call with the link lock held.
    fn drop_link(&self, link: &mut Link, error: &ClientError) {
        link.epoch += 1;
        link.state = ConnectionState::Offline;
        link.last_error = Some(error.to_string());
        self.inner.state_tx.send_replace(ConnectionState::Offline);
    }

    /// The unlocked half of [`drop_link`](Self::drop_link).
    fn after_drop_link(&self, error: &ClientError) {
        self.inner.transport.close();
        warn!(url = %self.inner.url, ?error, "Write failed, connection dropped to offline");
        self.notify_state(ConnectionState::Offline);
        self.inner.observer.on_error(error);
    }

    fn on_closed(&self, epoch: u64) {
        {
            let mut link = self.inner.link.lock();
            if link.epoch != epoch || link.state == ConnectionState::Offline {
                return;
            }
            link.state = ConnectionState::Offline;
            self.inner.state_tx.send_replace(ConnectionState::Offline);
        }

        self.inner.transport.close();
        warn!(
            url = %self.inner.url,
            pending_acks = self.inner.acks.pending_count(),
            "Connection closed"
        );
        self.notify_state(ConnectionState::Offline);
    }

    fn on_errored(&self, reason: String) {
        error!(url = %self.inner.url, %reason, "Transport error");
        self.inner.link.lock().last_error = Some(reason.clone());
        self.inner
            .observer
            .on_error(&ClientError::ConnectionFailed(reason));
    }

    fn dispatch(&self, text: &str) {
        let response = match Response::from_json(text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, bytes = text.len(), "Dropping malformed frame");
                return;
            }
        };

        debug!(msg_type = response.type_name(), "Received frame");

        match response {
            Response::Ack(frame) => {
                self.inner.acks.resolve(frame.ack, frame.into());
            }
            Response::AuthAck(frame) => {
                self.inner.acks.resolve(frame.ack, frame.into());
            }
            Response::Event(frame) => self.dispatch_event(frame),
        }
    }

    fn dispatch_event(&self, frame: EventFrame) {
        let EventFrame {
            event_type,
            path,
            child,
            value,
            err,
        } = frame;

        if let Some(reason) = err {
            let cancels = self.inner.listeners.cancel(&path, event_type);
            warn!(%path, kind = %event_type, %reason, "Subscription cancelled by store");

            let error = ClientError::Server(reason);
            for cancel in cancels {
                if catch_unwind(AssertUnwindSafe(|| cancel(&error))).is_err() {
                    error!(%path, kind = %event_type, "Cancel callback panicked");
                }
            }
            return;
        }

        let data_path = match child.as_deref() {
            Some(relative) => match path.child(relative) {
                Ok(data_path) => data_path,
                Err(e) => {
                    warn!(%path, ?e, "Dropping event with invalid child path");
                    return;
                }
            },
            None => path.clone(),
        };

        let snapshot = Snapshot::new(value, data_path, self.clone());
        let delivered = self.inner.listeners.dispatch(&path, event_type, &snapshot);
        debug!(%path, kind = %event_type, delivered, "Dispatched event");
    }

    fn notify_state(&self, state: ConnectionState) {
        self.inner
            .observer
            .on_state_change(state, self.inner.url.as_str());
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// Applies transport notifications in order until the connection is dropped.
async fn event_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    while let Some((epoch, event)) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        Connection { inner }.handle_event(epoch, event);
    }
    debug!("Connection event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryPeer, MemoryTransport};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn manual_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.connection.auto_connect = false;
        config
    }

    fn connection(config: ClientConfig) -> (Connection, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let conn = Connection::new(config, Arc::new(transport)).unwrap();
        (conn, peer)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn set(path: &str, value: Value, ack: u64) -> Request {
        Request::Set {
            path: Path::new(path).unwrap(),
            value,
            ack,
        }
    }

    #[test]
    fn test_requires_runtime() {
        let (transport, _peer) = MemoryTransport::pair();
        let result = Connection::new(ClientConfig::default(), Arc::new(transport));
        assert!(matches!(result, Err(ClientError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_queue_flushes_in_order_on_open() {
        let (conn, mut peer) = connection(manual_config());

        conn.send(&set("/a", json!(1), 0)).unwrap();
        conn.send(&set("/b", json!(2), 1)).unwrap();
        assert_eq!(conn.status().queued, 2);
        assert_eq!(conn.state(), ConnectionState::Offline);
        assert_eq!(peer.opens(), 0);

        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        conn.send(&set("/c", json!(3), 2)).unwrap();

        let paths: Vec<Value> = peer
            .drain()
            .iter()
            .map(|f| serde_json::from_str::<Value>(f).unwrap()["path"].clone())
            .collect();
        assert_eq!(paths, vec![json!("/a"), json!("/b"), json!("/c")]);
        assert_eq!(conn.status().queued, 0);
    }

    #[tokio::test]
    async fn test_auto_connect_on_first_send() {
        let (conn, mut peer) = connection(ClientConfig::default());

        conn.send(&set("/a", json!(1), 0)).unwrap();
        assert_eq!(peer.opens(), 1);

        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        let frame = peer.next_json().await.unwrap();
        assert_eq!(frame["cmd"], "set");
    }

    #[tokio::test]
    async fn test_go_online_is_idempotent() {
        let (conn, peer) = connection(manual_config());
        peer.set_auto_accept(false);

        conn.go_online().unwrap();
        conn.go_online().unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(peer.opens(), 1);

        peer.accept();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        conn.go_online().unwrap();
        assert_eq!(peer.opens(), 1);
    }

    #[tokio::test]
    async fn test_go_offline_suspends_auto_connect() {
        let (conn, mut peer) = connection(ClientConfig::default());
        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();

        conn.go_offline();
        conn.go_offline();
        assert_eq!(conn.state(), ConnectionState::Offline);

        conn.send(&set("/a", json!(1), 0)).unwrap();
        assert_eq!(peer.opens(), 1);
        assert_eq!(conn.status().queued, 1);
        assert!(peer.drain().is_empty());

        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        assert_eq!(peer.next_json().await.unwrap()["path"], "/a");
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let (conn, peer) = connection(manual_config());

        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();

        // Epoch 1 is the live socket. Anything tagged 0 is from before it.
        conn.handle_event(0, TransportEvent::Closed);
        assert_eq!(conn.state(), ConnectionState::Online);

        peer.close();
        conn.wait_for_state(ConnectionState::Offline).await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_open_reverts_to_offline() {
        let (conn, peer) = connection(manual_config());
        peer.refuse_open(true);

        assert!(conn.go_online().is_err());
        assert_eq!(conn.state(), ConnectionState::Offline);
        assert!(conn.status().last_error.is_some());

        peer.refuse_open(false);
        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_racing_a_close_is_queued_then_flushed() {
        let (conn, mut peer) = connection(manual_config());
        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();

        peer.sever();
        conn.send(&set("/a", json!(1), 0)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Offline);
        assert_eq!(conn.status().queued, 1);
        assert!(conn.status().last_error.is_some());

        // The late close belongs to the dropped socket.
        peer.close();
        settle().await;
        assert_eq!(conn.status().queued, 1);

        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        assert_eq!(peer.next_json().await.unwrap()["path"], "/a");
        assert_eq!(conn.status().queued, 0);
        assert_eq!(peer.opens(), 2);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (conn, peer) = connection(manual_config());
        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();

        peer.deliver("not json");
        peer.deliver(r#"{"type":"nack","ack":0}"#);
        settle().await;
        assert_eq!(conn.state(), ConnectionState::Online);
    }

    #[tokio::test]
    async fn test_request_resolves_on_ack() {
        let (conn, mut peer) = connection(ClientConfig::default());
        let (tx, rx) = tokio::sync::oneshot::channel();

        let id = conn
            .request(
                |ack| set("/a", json!("hi"), ack),
                move |reply| {
                    let _ = tx.send(reply);
                },
            )
            .unwrap();
        assert_eq!(id, 0);

        let frame = peer.next_json().await.unwrap();
        assert_eq!(frame["ack"], 0);
        peer.deliver(r#"{"type":"ack","ack":0,"err":"","res":null}"#);

        let reply = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.err, None);
        assert_eq!(conn.status().pending_acks, 0);
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<ConnectionState>>);

        impl ConnectionObserver for Recorder {
            fn on_state_change(&self, state: ConnectionState, _url: &str) {
                self.0.lock().push(state);
            }
            fn on_error(&self, _error: &ClientError) {}
        }

        let recorder = Arc::new(Recorder::default());
        let (transport, peer) = MemoryTransport::pair();
        let conn =
            Connection::with_observer(manual_config(), Arc::new(transport), recorder.clone()).unwrap();

        conn.go_online().unwrap();
        conn.wait_for_state(ConnectionState::Online).await.unwrap();
        peer.close();
        conn.wait_for_state(ConnectionState::Offline).await.unwrap();

        assert_eq!(
            *recorder.0.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Online,
                ConnectionState::Offline
            ]
        );
    }
}
