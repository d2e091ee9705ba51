//! # Error Types
//!
//! Domain-specific error types for turbo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  turbo-core errors (this file)                                         │
//! │  └── CoreError        - Path, event kind and delta validation          │
//! │                                                                         │
//! │  turbo-sync errors (separate crate)                                    │
//! │  └── ClientError      - Connection, protocol and server failures       │
//! │                                                                         │
//! │  Flow: CoreError → ClientError → caller / completion callback          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All core errors are raised synchronously at the call site, before any
//! frame is sent.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Validation failures in the data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A path string could not be normalized.
    ///
    /// ## When This Occurs
    /// - A segment is `.` or `..`
    /// - A segment contains an ASCII control character
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// An event kind outside the supported set.
    #[error("Unsupported event type: '{0}'")]
    UnsupportedEventType(String),

    /// A key in an update object cannot become a path segment.
    #[error("Invalid delta key '{key}': {reason}")]
    InvalidDeltaKey { key: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
