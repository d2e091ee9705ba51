//! # Client Error Types
//!
//! Error types for client operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Client Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │   Transport     │  │     Protocol            │ │
//! │  │  (synchronous)  │  │                 │  │                         │ │
//! │  │  Core(..)       │  │  ConnectionFail │  │  InvalidMessage         │ │
//! │  │  InvalidCallback│  │  NotConnected   │  │  SerializationFailed    │ │
//! │  │  Unsupported..  │  │  Timeout        │  │  DuplicateCorrelation   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Server      │  │      Transaction        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Server(err)    │  │  TooManyRetries         │ │
//! │  │  InvalidUrl     │  │  NotAuthentic.. │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors are `Clone` so a single failure can be handed to a completion
//! callback and returned to the caller.

use thiserror::Error;
use turbo_core::CoreError;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error type covering every failure the engine can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Path, event kind or delta key rejected by the data model.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A callback passed to `off` is not the one registered for that listener.
    #[error("Callback does not match the listener registered for {kind} at {path}")]
    InvalidCallback { path: String, kind: String },

    /// The operation is deliberately not supported.
    #[error("Turbo does not support {0}()")]
    UnsupportedOperation(&'static str),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid client configuration.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// Store URL could not be normalized to a WebSocket URL.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Connection is online but the transport has no open channel.
    #[error("Not connected to the store")]
    NotConnected,

    /// Failed to establish the WebSocket connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// No tokio runtime to run the connection on.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Inbound frame that could not be used.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize a frame or value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// An ack id was registered twice.
    #[error("Ack id {0} is already pending")]
    DuplicateCorrelation(u64),

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Error string reported by the store, forwarded verbatim.
    #[error("Server error: {0}")]
    Server(String),

    /// `unauth` was called without a session token.
    #[error("Cannot unauth if not authed yet")]
    NotAuthenticated,

    // =========================================================================
    // Transaction Errors
    // =========================================================================
    /// A transaction kept conflicting past its attempt limit.
    #[error("Transaction gave up after {attempts} conflicting attempts")]
    TooManyRetries { attempts: u32 },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ClientError::NotConnected,
            WsError::Protocol(p) => ClientError::WebSocketError(p.to_string()),
            WsError::Io(io) => ClientError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => ClientError::TlsError(tls.to_string()),
            other => ClientError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ClientError {
    fn from(err: toml::ser::Error) -> Self {
        ClientError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl ClientError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Not connected
    /// - Transactions that hit their attempt limit
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed(_)
                | ClientError::NotConnected
                | ClientError::Timeout(_)
                | ClientError::WebSocketError(_)
                | ClientError::TooManyRetries { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidConfig(_)
                | ClientError::InvalidUrl(_)
                | ClientError::ConfigLoadFailed(_)
                | ClientError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidMessage(_)
                | ClientError::SerializationFailed(_)
                | ClientError::DuplicateCorrelation(_)
        )
    }

    /// Returns true if the call was rejected before anything was sent.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ClientError::Core(_)
                | ClientError::InvalidCallback { .. }
                | ClientError::UnsupportedOperation(_)
                | ClientError::NotAuthenticated
        )
    }
}
