//! Shared fixtures: tracing setup and an in-process store server.
//!
//! The store keeps one JSON tree and speaks the client protocol over axum
//! WebSockets.
//!
//! ```text
//!   write at W  ──►  tree updated, W and its ancestors get a new revision
//!               ──►  value events to subscribers at W, above W (with child)
//!                    and below W
//!               ──►  child_added / child_changed / child_removed to the
//!                    subscribers at W's parent
//!               ──►  ack to the writer
//! ```
//!
//! Subscribing does not send the current value.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use turbo_core::Revision;
use turbo_sync::protocol::{AckFrame, AuthAckFrame, EventFrame, CONFLICT};
use turbo_sync::{EventKind, Path, Request, Response};

/// Credential the store accepts.
pub const GOOD_CREDENTIAL: &str = "secret";

/// Initializes test logging once. `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Receives `rx`'s next item or fails after a second.
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a value")
        .expect("channel closed")
}

// =============================================================================
// Store State
// =============================================================================

#[derive(Default)]
struct Tree {
    root: Value,
    revisions: HashMap<Path, u64>,
    clock: u64,
    next_push: u64,
    tokens: HashSet<String>,
    peers: HashMap<usize, mpsc::UnboundedSender<Message>>,
    subscriptions: Vec<(usize, Path, EventKind)>,
}

impl Tree {
    fn get(&self, path: &Path) -> Value {
        path.segments()
            .try_fold(&self.root, |value, segment| value.get(segment))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn revision(&self, path: &Path) -> Revision {
        let mut current = path.clone();
        let mut revision = self.revisions.get(&current).copied().unwrap_or(0);
        while !current.is_root() {
            current = current.parent();
            revision = revision.max(self.revisions.get(&current).copied().unwrap_or(0));
        }
        Revision(revision)
    }

    fn put(&mut self, path: &Path, value: Value) {
        let segments: Vec<&str> = path.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            self.root = value;
            return;
        };

        let mut cursor = &mut self.root;
        for segment in parents {
            if !cursor.is_object() {
                *cursor = Value::Object(Map::new());
            }
            cursor = cursor
                .as_object_mut()
                .unwrap()
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }

        let map = cursor.as_object_mut().unwrap();
        if value.is_null() {
            map.remove(*last);
        } else {
            map.insert(last.to_string(), value);
        }
    }

    /// Writes `value` at `path` and notifies subscribers.
    fn write(&mut self, path: &Path, value: Value) {
        let prior = self.get(path);
        self.put(path, value);
        let current = self.get(path);

        self.clock += 1;
        let mut touched = path.clone();
        loop {
            self.revisions.insert(touched.clone(), self.clock);
            if touched.is_root() {
                break;
            }
            touched = touched.parent();
        }

        let mut events = Vec::new();
        for (peer, subscribed, kind) in &self.subscriptions {
            let event = match kind {
                EventKind::Value if subscribed == path => Some((None, current.clone())),
                EventKind::Value if subscribed.is_ancestor_of(path) => Some((
                    subscribed.relative_to(path).map(str::to_owned),
                    current.clone(),
                )),
                EventKind::Value if path.is_ancestor_of(subscribed) => {
                    Some((None, self.get(subscribed)))
                }
                EventKind::ChildAdded | EventKind::ChildChanged | EventKind::ChildRemoved
                    if !path.is_root() && &path.parent() == subscribed =>
                {
                    let child = Some(path.name().to_string());
                    match (kind, prior.is_null(), current.is_null()) {
                        (EventKind::ChildAdded, true, false) => Some((child, current.clone())),
                        (EventKind::ChildRemoved, false, true) => Some((child, prior.clone())),
                        (EventKind::ChildChanged, false, false) if prior != current => {
                            Some((child, current.clone()))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some((child, value)) = event {
                events.push((
                    *peer,
                    Response::Event(EventFrame {
                        event_type: *kind,
                        path: subscribed.clone(),
                        child,
                        value,
                        err: None,
                    }),
                ));
            }
        }

        for (peer, event) in events {
            self.send(peer, &event);
        }
    }

    fn send(&self, peer: usize, response: &Response) {
        if let (Some(tx), Ok(json)) = (self.peers.get(&peer), response.to_json()) {
            let _ = tx.send(Message::Text(json.into()));
        }
    }

    fn ack(&self, peer: usize, ack: u64, err: Option<&str>, res: Value, revision: Option<Revision>) {
        self.send(
            peer,
            &Response::Ack(AckFrame {
                ack,
                err: err.map(str::to_owned),
                res,
                revision,
            }),
        );
    }

    fn handle(&mut self, peer: usize, request: Request) {
        debug!(peer, cmd = request.cmd(), "Store received request");

        match request {
            Request::On { path, event_type } => {
                self.subscriptions.push((peer, path, event_type));
            }
            Request::Off { path, event_type } => {
                self.subscriptions
                    .retain(|(p, s, k)| !(*p == peer && *s == path && *k == event_type));
            }
            Request::Set { path, value, ack } => {
                self.write(&path, value);
                self.ack(peer, ack, None, Value::Null, None);
            }
            Request::Update {
                path,
                value,
                deltas,
                ack,
            } => {
                if let Some(value) = value {
                    self.write(&path, value);
                }
                for (key, value) in deltas.unwrap_or_default() {
                    if let Ok(target) = path.child(&key) {
                        self.write(&target, value);
                    }
                }
                self.ack(peer, ack, None, Value::Null, None);
            }
            Request::Remove { path, ack } => {
                self.write(&path, Value::Null);
                self.ack(peer, ack, None, Value::Null, None);
            }
            Request::Push { path, value, ack } => {
                self.next_push += 1;
                let name = format!("-k{:06}", self.next_push);
                if let Ok(target) = path.child(&name) {
                    self.write(&target, value);
                }
                self.ack(peer, ack, None, Value::String(name), None);
            }
            Request::TransGet { path, ack } => {
                let value = self.get(&path);
                let revision = self.revision(&path);
                self.ack(peer, ack, None, value, Some(revision));
            }
            Request::TransSet {
                path,
                value,
                revision,
                ack,
            } => {
                if revision == self.revision(&path) {
                    self.write(&path, value);
                    self.ack(peer, ack, None, Value::Null, None);
                } else {
                    let current = self.get(&path);
                    let revision = self.revision(&path);
                    self.ack(peer, ack, Some(CONFLICT), current, Some(revision));
                }
            }
            Request::Auth { cred, ack } => {
                let frame = if cred == GOOD_CREDENTIAL {
                    let token = format!("token-{}", self.tokens.len() + 1);
                    self.tokens.insert(token.clone());
                    AuthAckFrame {
                        ack,
                        err: None,
                        token: Some(token),
                        res: Value::Null,
                    }
                } else {
                    AuthAckFrame {
                        ack,
                        err: Some("invalid credential".into()),
                        token: None,
                        res: Value::Null,
                    }
                };
                self.send(peer, &Response::AuthAck(frame));
            }
            Request::Unauth { token, ack } => {
                if self.tokens.remove(&token) {
                    self.ack(peer, ack, None, Value::Null, None);
                } else {
                    self.ack(peer, ack, Some("unknown token"), Value::Null, None);
                }
            }
        }
    }

    fn disconnect(&mut self, peer: usize) {
        self.peers.remove(&peer);
        self.subscriptions.retain(|(p, _, _)| *p != peer);
    }
}

struct StoreState {
    tree: Mutex<Tree>,
    next_peer: AtomicUsize,
}

// =============================================================================
// Store Server
// =============================================================================

/// In-process store listening on a random local port.
pub struct TestStore {
    pub url: String,
    state: Arc<StoreState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestStore {
    pub async fn start() -> TestStore {
        init_tracing();

        let state = Arc::new(StoreState {
            tree: Mutex::new(Tree::default()),
            next_peer: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!(%addr, "Test store started");
        TestStore {
            url: format!("ws://{}/ws", addr),
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    /// Current value at `path`.
    pub fn value(&self, path: &str) -> Value {
        self.state.tree.lock().get(&Path::new(path).unwrap())
    }

    /// Number of open client sockets.
    pub fn peers(&self) -> usize {
        self.state.tree.lock().peers.len()
    }

    /// Closes every client socket from the store side.
    pub fn disconnect_all(&self) {
        let tree = self.state.tree.lock();
        for tx in tree.peers.values() {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Cancels every subscription at `path` with `reason`.
    pub fn revoke(&self, path: &str, kind: EventKind, reason: &str) {
        let path = Path::new(path).unwrap();
        let mut tree = self.state.tree.lock();
        let peers: Vec<usize> = tree
            .subscriptions
            .iter()
            .filter(|(_, s, k)| *s == path && *k == kind)
            .map(|(p, _, _)| *p)
            .collect();
        tree.subscriptions
            .retain(|(_, s, k)| !(*s == path && *k == kind));

        for peer in peers {
            tree.send(
                peer,
                &Response::Event(EventFrame {
                    event_type: kind,
                    path: path.clone(),
                    child: None,
                    value: Value::Null,
                    err: Some(reason.to_string()),
                }),
            );
        }
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<StoreState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<StoreState>) {
    let peer = state.next_peer.fetch_add(1, Ordering::SeqCst);
    let (mut sender, mut receiver) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

    state.tree.lock().peers.insert(peer, outgoing_tx);
    debug!(peer, "Store peer connected");

    let outgoing = tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match Request::from_json(text.as_str()) {
                Ok(request) => state.tree.lock().handle(peer, request),
                Err(e) => debug!(peer, ?e, "Store ignoring malformed request"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.tree.lock().disconnect(peer);
    outgoing.abort();
    debug!(peer, "Store peer disconnected");
}
