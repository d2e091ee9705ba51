//! # Client
//!
//! Path-scoped handle over a shared [`Connection`].
//!
//! ## Handles and Identity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Connection ◄──────┬──────────────┬──────────────┐                    │
//! │   (one socket)      │              │              │                    │
//! │               Client @ /     Client @ /users  Client @ /users/ada      │
//! │               id 7f3a…       id 02c1…         id e9b4…                 │
//! │                     │                                                   │
//! │                  .clone() ──► same path, same id                       │
//! │                  .child("users") ──► new handle, new id                │
//! │                                                                         │
//! │  Listeners are keyed by the handle's id unless a context tag is given, │
//! │  so `off` must be called on the handle (or with the tag) used in `on`. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Completions
//! Every write comes in two forms. `set(value)` returns a [`Completion`]
//! future that resolves with the store's reply; dropping it makes the write
//! fire-and-forget. `set_with(value, callback)` hands the reply to a
//! closure instead. Either way the reply is delivered at most once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};
use turbo_core::{flatten, ConnectionState, EventKind, Path};
use url::Url;
use uuid::Uuid;

use crate::ack::AckReply;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::listener::{Callback, ListenOptions, ListenerIdentity};
use crate::protocol::Request;
use crate::snapshot::Snapshot;
use crate::transaction::{self, TransactionOutcome};

// =============================================================================
// Client Identity
// =============================================================================

/// Identity a handle registers listeners under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Resolves with the store's reply to a request.
///
/// Yields [`ClientError::ChannelError`] if the reply can no longer arrive.
#[must_use = "dropping a Completion discards the reply but the request is still sent"]
pub struct Completion<T = Value> {
    rx: oneshot::Receiver<ClientResult<T>>,
}

impl<T> Future for Completion<T> {
    type Output = ClientResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ClientError::ChannelError(
                    "request dropped before the store replied".into(),
                ))
            })
        })
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// A callback that fulfils the returned [`Completion`].
fn completion<T: Send + 'static>() -> (impl FnOnce(ClientResult<T>) + Send + 'static, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    let fulfil = move |outcome: ClientResult<T>| {
        let _ = tx.send(outcome);
    };
    (fulfil, Completion { rx })
}

// =============================================================================
// Client
// =============================================================================

/// Handle to one location in the store.
///
/// ## Usage
/// ```rust,ignore
/// let root = Client::connect(ClientConfig::for_url("localhost:4000/ws"))?;
/// let greeting = root.child("greeting")?;
///
/// greeting.on("value", |snap| println!("{}", snap.val()))?;
/// greeting.set(json!({ "a": "hi", "b": "there" }))?.await?;
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    conn: Connection,
    path: Path,
    id: ClientId,
}

impl Client {
    /// Handle to the root of `conn`'s store.
    pub fn new(conn: &Connection) -> Self {
        Self::at(conn, Path::root())
    }

    /// Handle to `path` on `conn`'s store.
    pub fn at(conn: &Connection, path: Path) -> Self {
        Client {
            conn: conn.clone(),
            path,
            id: ClientId::new(),
        }
    }

    /// Opens a WebSocket connection and returns a handle to its root.
    ///
    /// The socket opens on first use unless auto-connect is off.
    pub fn connect(config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::websocket(config)?;
        Ok(Self::new(&conn))
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Handle to a location below this one. `""` returns this location.
    pub fn child(&self, relative: &str) -> ClientResult<Client> {
        Ok(Self::at(&self.conn, self.path.child(relative)?))
    }

    /// Handle to the enclosing location. The root is its own parent.
    pub fn parent(&self) -> Client {
        Self::at(&self.conn, self.path.parent())
    }

    pub fn root(&self) -> Client {
        Self::at(&self.conn, Path::root())
    }

    /// The last path segment, or `/` at the root.
    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The normalized store URL.
    pub fn url(&self) -> &Url {
        self.conn.url()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Listens for `kind` events at this location.
    ///
    /// Returns the registered callback, which `off` needs to remove it.
    pub fn on<F>(&self, kind: &str, callback: F) -> ClientResult<Callback>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.on_with(kind, Arc::new(callback), ListenOptions::default())
    }

    /// Listens with a cancel callback and/or context tag.
    ///
    /// Registering the same callback slot again (same location, kind and
    /// identity) replaces the earlier callback.
    pub fn on_with(
        &self,
        kind: &str,
        callback: Callback,
        options: ListenOptions,
    ) -> ClientResult<Callback> {
        let kind: EventKind = kind.parse()?;
        let identity = self.identity(options.context);

        debug!(path = %self.path, %kind, %identity, "Registering listener");
        self.conn
            .listen(&self.path, kind, identity, callback.clone(), options.cancel)?;
        Ok(callback)
    }

    /// Removes a listener registered by this handle.
    pub fn off(&self, kind: &str, callback: &Callback) -> ClientResult<()> {
        self.off_with(kind, callback, None)
    }

    /// Removes a listener registered with `context`.
    ///
    /// Fails with [`ClientError::InvalidCallback`] if a different callback
    /// occupies the slot. A missing listener is not an error.
    pub fn off_with(&self, kind: &str, callback: &Callback, context: Option<&str>) -> ClientResult<()> {
        let kind: EventKind = kind.parse()?;
        let identity = self.identity(context.map(str::to_owned));

        debug!(path = %self.path, %kind, %identity, "Removing listener");
        self.conn.unlisten(&self.path, kind, &identity, callback)
    }

    fn identity(&self, context: Option<String>) -> ListenerIdentity {
        match context {
            Some(tag) => ListenerIdentity::Context(tag),
            None => ListenerIdentity::Client(self.id),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replaces the value here. `null` deletes it.
    pub fn set<T: Serialize>(&self, value: T) -> ClientResult<Completion> {
        let (fulfil, completion) = completion();
        self.set_with(value, fulfil)?;
        Ok(completion)
    }

    pub fn set_with<T, F>(&self, value: T, on_complete: F) -> ClientResult<()>
    where
        T: Serialize,
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let value = serde_json::to_value(value)?;
        self.write(|path, ack| Request::Set { path, value, ack }, on_complete)
    }

    /// Merges `partial` into the value here.
    ///
    /// Objects are sent as a flat map of leaf paths, so `{ "a": { "b": 1 } }`
    /// touches only `a/b`. Anything else replaces the value.
    pub fn update<T: Serialize>(&self, partial: T) -> ClientResult<Completion> {
        let (fulfil, completion) = completion();
        self.update_with(partial, fulfil)?;
        Ok(completion)
    }

    pub fn update_with<T, F>(&self, partial: T, on_complete: F) -> ClientResult<()>
    where
        T: Serialize,
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let (value, deltas) = match serde_json::to_value(partial)? {
            Value::Object(object) => (None, Some(flatten(&object)?)),
            other => (Some(other), None),
        };
        self.write(
            |path, ack| Request::Update {
                path,
                value,
                deltas,
                ack,
            },
            on_complete,
        )
    }

    /// Deletes the value here.
    pub fn remove(&self) -> ClientResult<Completion> {
        let (fulfil, completion) = completion();
        self.remove_with(fulfil)?;
        Ok(completion)
    }

    pub fn remove_with<F>(&self, on_complete: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        self.write(|path, ack| Request::Remove { path, ack }, on_complete)
    }

    /// Adds a child under a store-generated name.
    ///
    /// Resolves with whatever the store returns, normally the new name.
    pub fn push<T: Serialize>(&self, value: T) -> ClientResult<Completion> {
        let (fulfil, completion) = completion();
        self.push_with(value, fulfil)?;
        Ok(completion)
    }

    pub fn push_with<T, F>(&self, value: T, on_complete: F) -> ClientResult<()>
    where
        T: Serialize,
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let value = serde_json::to_value(value)?;
        self.write(|path, ack| Request::Push { path, value, ack }, on_complete)
    }

    fn write<B, F>(&self, build: B, on_complete: F) -> ClientResult<()>
    where
        B: FnOnce(Path, u64) -> Request,
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let path = self.path.clone();
        self.conn.request(
            move |ack| build(path, ack),
            move |reply| on_complete(reply.and_then(AckReply::into_result)),
        )?;
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Atomically rewrites the value here with `transform`.
    ///
    /// `transform` may run several times, once per conflicting attempt,
    /// and each time on the latest value the store reported. Returning
    /// `None` cancels.
    pub fn transaction<F>(&self, transform: F) -> Completion<TransactionOutcome>
    where
        F: FnMut(&Value) -> Option<Value> + Send + 'static,
    {
        let (fulfil, completion) = completion();
        self.transaction_with(transform, fulfil);
        completion
    }

    pub fn transaction_with<F, C>(&self, transform: F, on_complete: C)
    where
        F: FnMut(&Value) -> Option<Value> + Send + 'static,
        C: FnOnce(ClientResult<TransactionOutcome>) + Send + 'static,
    {
        transaction::run(
            &self.conn,
            self.path.clone(),
            Box::new(transform),
            Box::new(on_complete),
        );
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Authenticates the connection. Resolves with the session token.
    pub fn auth(&self, credential: impl Into<String>) -> ClientResult<Completion<String>> {
        let (fulfil, completion) = completion();
        self.auth_with(credential, fulfil)?;
        Ok(completion)
    }

    pub fn auth_with<F>(&self, credential: impl Into<String>, on_complete: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<String>) + Send + 'static,
    {
        let cred = credential.into();
        let conn = self.conn.clone();

        self.conn.request(
            |ack| Request::Auth { cred, ack },
            move |reply| {
                let outcome = reply.and_then(session_token);
                if let Ok(token) = &outcome {
                    info!(url = %conn.url(), "Authenticated");
                    conn.set_auth_token(Some(token.clone()));
                }
                on_complete(outcome);
            },
        )?;
        Ok(())
    }

    /// Ends the session started by [`auth`](Self::auth).
    pub fn unauth(&self) -> ClientResult<Completion> {
        let (fulfil, completion) = completion();
        self.unauth_with(fulfil)?;
        Ok(completion)
    }

    pub fn unauth_with<F>(&self, on_complete: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Value>) + Send + 'static,
    {
        let token = self.conn.auth_token().ok_or(ClientError::NotAuthenticated)?;
        let conn = self.conn.clone();

        self.conn.request(
            |ack| Request::Unauth { token, ack },
            move |reply| {
                let outcome = reply.and_then(AckReply::into_result);
                if outcome.is_ok() {
                    info!(url = %conn.url(), "Session ended");
                    conn.set_auth_token(None);
                }
                on_complete(outcome);
            },
        )?;
        Ok(())
    }

    // =========================================================================
    // Connection Control
    // =========================================================================

    pub fn go_online(&self) -> ClientResult<()> {
        self.conn.go_online()
    }

    pub fn go_offline(&self) {
        self.conn.go_offline()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    // =========================================================================
    // Unsupported
    // =========================================================================

    pub fn set_priority(&self, _priority: impl Serialize) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("set_priority"))
    }

    pub fn set_with_priority(&self, _value: impl Serialize, _priority: impl Serialize) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("set_with_priority"))
    }

    pub fn on_disconnect(&self) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("on_disconnect"))
    }

    pub fn remove_on_disconnect(&self) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("remove_on_disconnect"))
    }

    pub fn set_on_disconnect(&self, _value: impl Serialize) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("set_on_disconnect"))
    }

    pub fn enable_logging(&self, _enabled: bool) -> ClientResult<()> {
        Err(ClientError::UnsupportedOperation("enable_logging"))
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// Pulls the session token out of an `authAck`.
fn session_token(reply: AckReply) -> ClientResult<String> {
    if let Some(err) = reply.err {
        return Err(ClientError::Server(err));
    }
    reply
        .token
        .or_else(|| reply.res.as_str().map(str::to_owned))
        .ok_or_else(|| ClientError::InvalidMessage("authAck without a token".into()))
}
