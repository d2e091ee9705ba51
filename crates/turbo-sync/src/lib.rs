//! # turbo-sync: Client Engine for Turbo Stores
//!
//! Keeps a live, path-addressed view of a remote JSON store over a single
//! duplex connection: subscriptions, acknowledged writes, optimistic
//! transactions and an offline queue.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Client Engine Architecture                       │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 Client (path-scoped handles)                     │  │
//! │  │  child / parent / root • on / off • set / update / remove / push │  │
//! │  │  transaction • auth / unauth • go_online / go_offline            │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                 Connection (one per store)                       │  │
//! │  │  Offline ⇄ Connecting ⇄ Online • FIFO offline queue • epochs     │  │
//! │  └──────┬───────────────────────┬───────────────────────┬───────────┘  │
//! │         ▼                       ▼                       ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────────┐│
//! │  │   AckRouter    │  │ ListenerRegistry   │  │     Transport          ││
//! │  │                │  │                    │  │                        ││
//! │  │ ack id →       │  │ (path, kind, id) → │  │ WebSocket (tungstenite)││
//! │  │ completion     │  │ callback           │  │ or in-memory peer      ││
//! │  └───────┬────────┘  └────────────────────┘  └────────────────────────┘│
//! │          ▼                                                              │
//! │  ┌────────────────┐                                                     │
//! │  │  Transaction   │  transGet → transform → transSet, retried on       │
//! │  │  engine        │  conflict with the store's fresh value             │
//! │  └────────────────┘                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - Path-scoped `Client` handle and `Completion` futures
//! - [`connection`] - Connection state machine, queue and dispatch
//! - [`ack`] - Ack id allocation and completion routing
//! - [`listener`] - Listener registry
//! - [`transaction`] - Optimistic transactions
//! - [`snapshot`] - Immutable event data
//! - [`protocol`] - JSON wire frames
//! - [`transport`] - Transport trait and WebSocket implementation
//! - [`memory`] - In-memory transport for tests and embedding
//! - [`config`] - Client configuration (TOML + environment)
//! - [`error`] - Client error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use serde_json::json;
//! use turbo_sync::{Client, ClientConfig};
//!
//! let root = Client::connect(ClientConfig::load_or_default(None))?;
//! let greeting = root.child("greeting")?;
//!
//! greeting.on("value", |snap| println!("{} = {}", snap.path(), snap.val()))?;
//! greeting.set(json!({ "a": "hi", "b": "there" }))?.await?;
//!
//! let outcome = root
//!     .child("counter")?
//!     .transaction(|current| Some(json!(current.as_i64().unwrap_or(0) + 1)))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod ack;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod memory;
pub mod protocol;
pub mod snapshot;
pub mod transaction;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::{Client, ClientId, Completion};
pub use config::{ClientConfig, ConnectionSettings, ServerSettings, TransactionSettings};
pub use connection::{Connection, ConnectionObserver, ConnectionStatus, NoOpObserver};
pub use error::{ClientError, ClientResult};
pub use listener::{Callback, CancelCallback, ListenOptions};
pub use memory::{MemoryPeer, MemoryTransport};
pub use protocol::{Request, Response};
pub use snapshot::Snapshot;
pub use transaction::TransactionOutcome;
pub use transport::{Transport, TransportConfig, TransportEvent, WebSocketTransport};

pub use turbo_core::{ConnectionState, EventKind, Path};
