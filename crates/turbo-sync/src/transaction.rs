//! # Transaction Engine
//!
//! Optimistic read-modify-write against a single path.
//!
//! ## Attempt Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Transaction Lifecycle                            │
//! │                                                                         │
//! │   ┌──────────┐  transGet ack   ┌──────────┐  transSet ack   ┌─────────┐ │
//! │   │ Fetching │ ──────────────► │ Applying │ ──────────────► │Committed│ │
//! │   └──────────┘  (value, rev)   └──────────┘   err = ""      └─────────┘ │
//! │        ▲                            │   │                               │
//! │        │     err = "conflict"       │   │  other err / transform → None │
//! │        │     (value', rev')         │   ▼                               │
//! │        │                            │ ┌─────────┐                       │
//! │        └──── (no new transGet) ─────┘ │ Aborted │                       │
//! │                                       └─────────┘                       │
//! │                                                                         │
//! │  A conflict carries the store's current value and revision. The next   │
//! │  attempt re-runs the transform on that value; the rejected candidate   │
//! │  is never sent again.                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Policy
//! Conditional writes are capped at `max_attempts` (0 removes the cap).
//! When `initial_backoff_ms` is set, retries wait on an exponential backoff
//! instead of going out within the same dispatch turn.
//!
//! Two transactions that keep invalidating each other can livelock when
//! the cap is disabled.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use turbo_core::{Path, Revision};

use crate::ack::AckReply;
use crate::config::TransactionSettings;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Request, CONFLICT};

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// The store accepted `value` on attempt number `attempts`.
    Committed { value: Value, attempts: u32 },
    /// The transform returned `None`. `value` is the last value it saw.
    Cancelled { value: Value },
}

impl TransactionOutcome {
    /// The committed value, or the last value seen before cancelling.
    pub fn value(&self) -> &Value {
        match self {
            TransactionOutcome::Committed { value, .. } | TransactionOutcome::Cancelled { value } => {
                value
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed { .. })
    }
}

/// Computes the new value from the current one. `None` cancels.
pub type Transform = Box<dyn FnMut(&Value) -> Option<Value> + Send>;

/// Receives the final outcome of a transaction.
pub type TransactionCallback = Box<dyn FnOnce(ClientResult<TransactionOutcome>) + Send>;

/// Base data for one conditional write.
struct Attempt {
    base: Value,
    revision: Revision,
    number: u32,
}

struct Transaction {
    conn: Connection,
    path: Path,
    transform: Transform,
    on_complete: TransactionCallback,
    max_attempts: u32,
    backoff: Option<ExponentialBackoff>,
}

/// Starts a transaction at `path`. The outcome is delivered to
/// `on_complete` exactly once, unless the connection closes first.
pub(crate) fn run(
    conn: &Connection,
    path: Path,
    transform: Transform,
    on_complete: TransactionCallback,
) {
    let settings = &conn.config().transaction;
    let transaction = Transaction {
        conn: conn.clone(),
        path,
        transform,
        on_complete,
        max_attempts: settings.max_attempts,
        backoff: retry_backoff(settings),
    };
    transaction.fetch();
}

/// Creates the retry backoff, if retries are delayed at all.
fn retry_backoff(settings: &TransactionSettings) -> Option<ExponentialBackoff> {
    settings.initial_backoff().map(|initial| {
        let mut backoff = ExponentialBackoff {
            initial_interval: initial,
            max_interval: settings.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        // `..Default::default()` leaves `current_interval` at 500ms.
        backoff.reset();
        backoff
    })
}

impl Transaction {
    fn fetch(self) {
        let conn = self.conn.clone();
        let path = self.path.clone();
        debug!(%path, "Transaction fetching");

        let sent = conn.request(
            |ack| Request::TransGet { path, ack },
            move |reply| self.on_fetched(reply),
        );
        if let Err(e) = sent {
            debug!(?e, "Transaction fetch not sent");
        }
    }

    fn on_fetched(self, reply: ClientResult<AckReply>) {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return self.finish(Err(e)),
        };
        if let Some(err) = reply.err {
            return self.finish(Err(ClientError::Server(err)));
        }
        let Some(revision) = reply.revision else {
            return self.finish(Err(ClientError::InvalidMessage(
                "transGet ack without revision".into(),
            )));
        };

        self.apply(Attempt {
            base: reply.res,
            revision,
            number: 1,
        });
    }

    fn apply(mut self, attempt: Attempt) {
        let Some(candidate) = (self.transform)(&attempt.base) else {
            info!(path = %self.path, attempt = attempt.number, "Transaction cancelled by transform");
            return self.finish(Ok(TransactionOutcome::Cancelled {
                value: attempt.base,
            }));
        };

        let conn = self.conn.clone();
        let path = self.path.clone();
        let revision = attempt.revision;
        let number = attempt.number;
        let value = candidate.clone();
        debug!(%path, %revision, attempt = number, "Transaction applying");

        let sent = conn.request(
            |ack| Request::TransSet {
                path,
                value,
                revision,
                ack,
            },
            move |reply| self.on_applied(candidate, number, reply),
        );
        if let Err(e) = sent {
            debug!(?e, "Transaction write not sent");
        }
    }

    fn on_applied(self, candidate: Value, number: u32, reply: ClientResult<AckReply>) {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => return self.finish(Err(e)),
        };

        match reply.err {
            None => self.finish(Ok(TransactionOutcome::Committed {
                value: candidate,
                attempts: number,
            })),
            Some(err) if err == CONFLICT => {
                if self.max_attempts > 0 && number >= self.max_attempts {
                    return self.finish(Err(ClientError::TooManyRetries { attempts: number }));
                }
                let Some(revision) = reply.revision else {
                    return self.finish(Err(ClientError::InvalidMessage(
                        "conflict ack without revision".into(),
                    )));
                };

                debug!(path = %self.path, attempt = number, %revision, "Transaction conflicted");
                self.retry(Attempt {
                    base: reply.res,
                    revision,
                    number: number + 1,
                });
            }
            Some(err) => self.finish(Err(ClientError::Server(err))),
        }
    }

    fn retry(mut self, attempt: Attempt) {
        let delay = self.backoff.as_mut().and_then(|b| b.next_backoff());

        match (delay, Handle::try_current()) {
            (Some(delay), Ok(runtime)) => {
                debug!(?delay, attempt = attempt.number, "Waiting before transaction retry");
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    self.apply(attempt);
                });
            }
            _ => self.apply(attempt),
        }
    }

    fn finish(self, outcome: ClientResult<TransactionOutcome>) {
        match &outcome {
            Ok(TransactionOutcome::Committed { attempts, .. }) => {
                info!(path = %self.path, attempts, "Transaction committed");
            }
            Ok(TransactionOutcome::Cancelled { .. }) => {}
            Err(e) => warn!(path = %self.path, error = %e, "Transaction aborted"),
        }
        (self.on_complete)(outcome);
    }
}
