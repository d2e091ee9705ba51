//! # Domain Types
//!
//! Small value types shared by the client engine and anything else that
//! speaks the store protocol.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   EventKind     │   │ ConnectionState │   │    Revision     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  value          │   │  offline        │   │  u64 fencing    │       │
//! │  │  child_added    │   │  connecting     │   │  token issued   │       │
//! │  │  child_changed  │   │  online         │   │  by the store   │       │
//! │  │  child_removed  │   │                 │   │                 │       │
//! │  │  child_moved    │   │                 │   │                 │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Event Kind
// =============================================================================

/// The kinds of change a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The value at the path changed.
    Value,
    /// A child appeared under the path.
    ChildAdded,
    /// A direct child's value changed.
    ChildChanged,
    /// A child disappeared; the event carries its last value.
    ChildRemoved,
    /// A child changed position among its siblings.
    ChildMoved,
}

impl EventKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Value,
        EventKind::ChildAdded,
        EventKind::ChildChanged,
        EventKind::ChildRemoved,
        EventKind::ChildMoved,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Value => "value",
            EventKind::ChildAdded => "child_added",
            EventKind::ChildChanged => "child_changed",
            EventKind::ChildRemoved => "child_removed",
            EventKind::ChildMoved => "child_moved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnsupportedEventType(s.to_string()))
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the single socket shared by every client of a connection.
///
/// ```text
///   Offline ──(first write / go_online)──► Connecting ──(opened)──► Online
///      ▲                                       │                       │
///      └──────────(closed / go_offline)────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket. Outbound frames are queued.
    #[default]
    Offline,
    /// A socket is being opened. Outbound frames are still queued.
    Connecting,
    /// Frames are written straight to the socket.
    Online,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Offline => write!(f, "offline"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Online => write!(f, "online"),
        }
    }
}

// =============================================================================
// Revision
// =============================================================================

/// Fencing token identifying the version of a value the store handed out.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
