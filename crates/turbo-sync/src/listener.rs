//! # Listener Registry
//!
//! Observers registered per (path, event kind, identity).
//!
//! ## Keying and Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Listener Entries                                │
//! │                                                                         │
//! │   #  path      kind           identity           callback              │
//! │   ─  ────────  ─────────────  ─────────────────  ────────              │
//! │   0  /         value          client 7f3a…       cb_a                  │
//! │   1  /users    child_added    client 7f3a…       cb_b                  │
//! │   2  /         value          context "sidebar"  cb_c                  │
//! │                                                                         │
//! │   event (/, value)  ──►  cb_a, then cb_c   (registration order)        │
//! │   on(/, value, client 7f3a…, cb_d)  ──►  row 0 now holds cb_d          │
//! │                                                                         │
//! │  Matching is exact: an event for /users never reaches row 0.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks are cloned out of the lock before they run, so a callback may
//! register or remove listeners itself.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;
use turbo_core::{EventKind, Path};

use crate::client::ClientId;
use crate::error::{ClientError, ClientResult};
use crate::snapshot::Snapshot;

/// A listener callback.
pub type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Invoked when the store cancels a subscription.
pub type CancelCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Who registered a listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerIdentity {
    /// The registering client handle.
    Client(ClientId),
    /// An explicit context tag, shared by any handle that presents it.
    Context(String),
}

impl fmt::Display for ListenerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerIdentity::Client(id) => write!(f, "client {}", id),
            ListenerIdentity::Context(tag) => write!(f, "context {:?}", tag),
        }
    }
}

/// Optional parts of a registration.
#[derive(Clone, Default)]
pub struct ListenOptions {
    /// Called if the store cancels the subscription.
    pub cancel: Option<CancelCallback>,
    /// Identity tag to register under instead of the client's own id.
    pub context: Option<String>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation callback.
    pub fn on_cancel<F>(mut self, cancel: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    /// Sets the context tag.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenOptions")
            .field("cancel", &self.cancel.is_some())
            .field("context", &self.context)
            .finish()
    }
}

struct ListenerEntry {
    path: Path,
    kind: EventKind,
    identity: ListenerIdentity,
    callback: Callback,
    cancel: Option<CancelCallback>,
}

impl ListenerEntry {
    fn matches(&self, path: &Path, kind: EventKind) -> bool {
        self.kind == kind && &self.path == path
    }
}

/// Result of removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The entry was removed. `last` is true if no other entry remains at
    /// that (path, kind).
    Removed { last: bool },
    /// Nothing was registered under that key.
    Missing,
}

/// Registered listeners, in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener, replacing any entry with the same key in place.
    ///
    /// Returns true if an existing entry was replaced.
    pub fn insert(
        &self,
        path: Path,
        kind: EventKind,
        identity: ListenerIdentity,
        callback: Callback,
        cancel: Option<CancelCallback>,
    ) -> bool {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.matches(&path, kind) && e.identity == identity)
        {
            entry.callback = callback;
            entry.cancel = cancel;
            return true;
        }

        entries.push(ListenerEntry {
            path,
            kind,
            identity,
            callback,
            cancel,
        });
        false
    }

    /// Removes the entry registered under (path, kind, identity).
    ///
    /// Fails with [`ClientError::InvalidCallback`] if an entry exists but
    /// holds a different callback.
    pub fn remove(
        &self,
        path: &Path,
        kind: EventKind,
        identity: &ListenerIdentity,
        callback: &Callback,
    ) -> ClientResult<Removal> {
        let mut entries = self.entries.lock();

        let Some(index) = entries
            .iter()
            .position(|e| e.matches(path, kind) && &e.identity == identity)
        else {
            return Ok(Removal::Missing);
        };

        if !same_callback(&entries[index].callback, callback) {
            return Err(ClientError::InvalidCallback {
                path: path.to_string(),
                kind: kind.to_string(),
            });
        }

        entries.remove(index);
        let last = !entries.iter().any(|e| e.matches(path, kind));
        Ok(Removal::Removed { last })
    }

    /// Callbacks registered at exactly (path, kind), in registration order.
    pub fn callbacks(&self, path: &Path, kind: EventKind) -> Vec<Callback> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.matches(path, kind))
            .map(|e| e.callback.clone())
            .collect()
    }

    /// Invokes every callback at (path, kind) with its own copy of
    /// `snapshot`. A panicking callback is logged and the rest still run.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, path: &Path, kind: EventKind, snapshot: &Snapshot) -> usize {
        let callbacks = self.callbacks(path, kind);

        for (index, callback) in callbacks.iter().enumerate() {
            let fresh = snapshot.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(&fresh))).is_err() {
                error!(%path, %kind, index, "Listener callback panicked");
            }
        }

        callbacks.len()
    }

    /// Removes every entry at (path, kind) and returns their cancel callbacks.
    pub fn cancel(&self, path: &Path, kind: EventKind) -> Vec<CancelCallback> {
        let mut entries = self.entries.lock();
        let mut cancels = Vec::new();
        entries.retain(|e| {
            if e.matches(path, kind) {
                if let Some(cancel) = &e.cancel {
                    cancels.push(cancel.clone());
                }
                false
            } else {
                true
            }
        });
        cancels
    }

    /// Number of entries at (path, kind).
    pub fn count(&self, path: &Path, kind: EventKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.matches(path, kind))
            .count()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Compares callbacks by allocation, ignoring vtables.
fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
