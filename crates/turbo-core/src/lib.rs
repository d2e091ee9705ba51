//! # turbo-core: Data Model for Turbo Clients
//!
//! Pure types shared by the client engine: how locations in the store are
//! addressed, which change events exist, and how partial updates are
//! encoded. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Turbo Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application code                             │   │
//! │  │      client.child("users/ada").on("value", |snap| ...)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    turbo-sync (client engine)                   │   │
//! │  │    Connection, acks, listeners, transactions, snapshots         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ turbo-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   path    │  │   types   │  │   value   │  │ validation│  │   │
//! │  │   │   Path    │  │ EventKind │  │  flatten  │  │  segment  │  │   │
//! │  │   │           │  │ Revision  │  │  inflate  │  │   rules   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO RUNTIME • PURE FUNCTIONS                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`path`] - Normalized store paths
//! - [`types`] - Event kinds, connection states, revisions
//! - [`value`] - Delta flatten/inflate for partial updates
//! - [`validation`] - Segment rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use turbo_core::{EventKind, Path};
//!
//! let users = Path::root().child("users").unwrap();
//! let ada = users.child("ada").unwrap();
//!
//! assert_eq!(ada.to_string(), "/users/ada");
//! assert_eq!(ada.parent(), users);
//! assert_eq!("child_added".parse::<EventKind>().unwrap(), EventKind::ChildAdded);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod path;
pub mod types;
pub mod validation;
pub mod value;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use path::Path;
pub use types::{ConnectionState, EventKind, Revision};
pub use value::{flatten, inflate, Deltas};
