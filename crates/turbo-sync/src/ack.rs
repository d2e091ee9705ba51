//! # Acknowledgment Router
//!
//! Pairs each acknowledged request with the callback waiting for it.
//!
//! ## Lifecycle of an Ack Id
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  next_id() ──► register(id, cb) ──► frame sent ──► resolve(id, reply)  │
//! │      │                                    │               │             │
//! │      │                                    │               ▼             │
//! │      │                             send failed       entry removed,    │
//! │      │                                    │          cb(Ok(reply))     │
//! │      │                                    ▼                             │
//! │      │                             abort(id, err) ──► entry removed,   │
//! │      │                                                cb(Err(err))     │
//! │      ▼                                                                  │
//! │  ids strictly increase and are never handed out twice                  │
//! │                                                                         │
//! │  A second resolve() for the same id finds nothing and does nothing.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, warn};
use turbo_core::Revision;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{AckFrame, AuthAckFrame};

/// What the store said about a request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AckReply {
    /// Server error string, `None` on success.
    pub err: Option<String>,
    /// Result value.
    pub res: Value,
    /// Revision of `res`, for transaction requests.
    pub revision: Option<Revision>,
    /// Session token, for `auth`.
    pub token: Option<String>,
}

impl AckReply {
    /// Converts into the caller-facing result: the server error or `res`.
    pub fn into_result(self) -> ClientResult<Value> {
        match self.err {
            Some(err) => Err(ClientError::Server(err)),
            None => Ok(self.res),
        }
    }
}

impl From<AckFrame> for AckReply {
    fn from(frame: AckFrame) -> Self {
        AckReply {
            err: frame.err,
            res: frame.res,
            revision: frame.revision,
            token: None,
        }
    }
}

impl From<AuthAckFrame> for AckReply {
    fn from(frame: AuthAckFrame) -> Self {
        AckReply {
            err: frame.err,
            res: frame.res,
            revision: None,
            token: frame.token,
        }
    }
}

/// Callback waiting on an ack. Receives `Err` if the request was aborted
/// before the store saw it.
pub type AckCallback = Box<dyn FnOnce(ClientResult<AckReply>) + Send>;

#[derive(Default)]
struct AckTable {
    next_id: u64,
    pending: HashMap<u64, AckCallback>,
}

/// Pending completion callbacks keyed by ack id.
#[derive(Default)]
pub struct AckRouter {
    table: Mutex<AckTable>,
}

impl AckRouter {
    /// Creates an empty router. The first id is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh ack id.
    pub fn next_id(&self) -> u64 {
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        id
    }

    /// Associates `callback` with `id`.
    pub fn register(&self, id: u64, callback: AckCallback) -> ClientResult<()> {
        let mut table = self.table.lock();
        if table.pending.contains_key(&id) {
            return Err(ClientError::DuplicateCorrelation(id));
        }
        table.pending.insert(id, callback);
        Ok(())
    }

    /// Completes `id` with the store's reply.
    ///
    /// Returns false for unknown ids (stale or duplicate acks).
    pub fn resolve(&self, id: u64, reply: AckReply) -> bool {
        self.complete(id, Ok(reply))
    }

    /// Completes `id` with a local failure.
    pub fn abort(&self, id: u64, error: ClientError) -> bool {
        self.complete(id, Err(error))
    }

    /// Number of requests still waiting for an ack.
    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    fn complete(&self, id: u64, outcome: ClientResult<AckReply>) -> bool {
        let callback = self.table.lock().pending.remove(&id);
        let Some(callback) = callback else {
            warn!(ack = id, "Ignoring ack with no pending request");
            return false;
        };

        if catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
            error!(ack = id, "Ack callback panicked");
        }
        true
    }
}
