//! # Store Protocol Messages
//!
//! JSON frames exchanged with the store.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Store Protocol Frames                              │
//! │                                                                         │
//! │  SUBSCRIPTIONS (fire-and-forget)                                       │
//! │  ───────────────────────────────                                       │
//! │  CLIENT ───► { cmd: "on",  path, eventType }                           │
//! │  CLIENT ───► { cmd: "off", path, eventType }                           │
//! │  STORE  ───► { type: "event", eventType, path, child?, value, err? }   │
//! │                                                                         │
//! │  WRITES                                                                │
//! │  ──────                                                                │
//! │  CLIENT ───► { cmd: "set" | "push",  path, value, ack }                │
//! │  CLIENT ───► { cmd: "update", path, value? | deltas?, ack }            │
//! │  CLIENT ───► { cmd: "remove", path, ack }                              │
//! │  STORE  ───► { type: "ack", ack, err, res }                            │
//! │                                                                         │
//! │  TRANSACTIONS                                                          │
//! │  ────────────                                                          │
//! │  CLIENT ───► { cmd: "transGet", path, ack }                            │
//! │  STORE  ───► { type: "ack", ack, res, revision }                       │
//! │  CLIENT ───► { cmd: "transSet", path, value, revision, ack }           │
//! │  STORE  ───► { type: "ack", ack, err: "conflict", res, revision }      │
//! │                                                                         │
//! │  SESSION                                                               │
//! │  ───────                                                               │
//! │  CLIENT ───► { cmd: "auth", cred, ack }                                │
//! │  STORE  ───► { type: "authAck", ack, err, token }                      │
//! │  CLIENT ───► { cmd: "unauth", token, ack }                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Requests are internally tagged by `cmd`, responses by `type`. An empty
//! `err` string means success. `"on"` is accepted as an alias of the
//! `"event"` response tag. Any other tag fails to parse.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use turbo_core::{Deltas, EventKind, Path, Revision};

/// Error string the store uses to reject a stale `transSet`.
pub const CONFLICT: &str = "conflict";

// =============================================================================
// Requests
// =============================================================================

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    /// Subscribe to an event kind at a path.
    On {
        path: Path,
        #[serde(rename = "eventType")]
        event_type: EventKind,
    },

    /// Drop a subscription.
    Off {
        path: Path,
        #[serde(rename = "eventType")]
        event_type: EventKind,
    },

    /// Replace the value at a path. `null` deletes.
    Set { path: Path, value: Value, ack: u64 },

    /// Merge into the value at a path.
    Update {
        path: Path,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deltas: Option<Deltas>,
        ack: u64,
    },

    /// Delete the value at a path.
    Remove { path: Path, ack: u64 },

    /// Append a child with a store-generated name.
    Push { path: Path, value: Value, ack: u64 },

    /// Read a value together with its revision.
    TransGet { path: Path, ack: u64 },

    /// Write a value if the revision is still current.
    TransSet {
        path: Path,
        value: Value,
        revision: Revision,
        ack: u64,
    },

    /// Start an authenticated session.
    Auth { cred: String, ack: u64 },

    /// End the authenticated session.
    Unauth { token: String, ack: u64 },
}

impl Request {
    /// Returns the `cmd` tag.
    pub fn cmd(&self) -> &'static str {
        match self {
            Request::On { .. } => "on",
            Request::Off { .. } => "off",
            Request::Set { .. } => "set",
            Request::Update { .. } => "update",
            Request::Remove { .. } => "remove",
            Request::Push { .. } => "push",
            Request::TransGet { .. } => "transGet",
            Request::TransSet { .. } => "transSet",
            Request::Auth { .. } => "auth",
            Request::Unauth { .. } => "unauth",
        }
    }

    /// The correlation id, for requests that expect an acknowledgment.
    pub fn ack(&self) -> Option<u64> {
        match self {
            Request::On { .. } | Request::Off { .. } => None,
            Request::Set { ack, .. }
            | Request::Update { ack, .. }
            | Request::Remove { ack, .. }
            | Request::Push { ack, .. }
            | Request::TransGet { ack, .. }
            | Request::TransSet { ack, .. }
            | Request::Auth { ack, .. }
            | Request::Unauth { ack, .. } => Some(*ack),
        }
    }

    /// The target path, for requests that have one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Request::On { path, .. }
            | Request::Off { path, .. }
            | Request::Set { path, .. }
            | Request::Update { path, .. }
            | Request::Remove { path, .. }
            | Request::Push { path, .. }
            | Request::TransGet { path, .. }
            | Request::TransSet { path, .. } => Some(path),
            Request::Auth { .. } | Request::Unauth { .. } => None,
        }
    }

    /// Serializes to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Frames sent by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Completion of an acknowledged request.
    #[serde(rename = "ack")]
    Ack(AckFrame),

    /// Completion of an `auth` request.
    #[serde(rename = "authAck")]
    AuthAck(AuthAckFrame),

    /// A change notification for a subscription.
    #[serde(rename = "event", alias = "on")]
    Event(EventFrame),
}

/// Payload of an `ack` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    /// Correlation id of the request being completed.
    pub ack: u64,

    /// Server error, `None` on success.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub err: Option<String>,

    /// Result value (read value, pushed name, conflicting value).
    #[serde(default)]
    pub res: Value,

    /// Revision of `res` for transaction requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
}

/// Payload of an `authAck` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthAckFrame {
    /// Correlation id of the `auth` request.
    pub ack: u64,

    /// Server error, `None` on success.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub err: Option<String>,

    /// Session token to present on `unauth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default)]
    pub res: Value,
}

/// Payload of an `event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Kind of change.
    #[serde(rename = "eventType")]
    pub event_type: EventKind,

    /// Subscription path the event is routed to.
    pub path: Path,

    /// Location of `value` relative to `path`, when it is not `path` itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<String>,

    /// The data carried by the event.
    #[serde(default)]
    pub value: Value,

    /// Set when the store cancels the subscription.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub err: Option<String>,
}

impl Response {
    /// Returns the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Response::Ack(_) => "ack",
            Response::AuthAck(_) => "authAck",
            Response::Event(_) => "event",
        }
    }

    /// Serializes to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Reads `err` so that both a missing field and `""` mean success.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}
