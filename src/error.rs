//! Error types for the streaming session layer.
//!
//! All errors implement the `std::error::Error` trait and carry enough
//! structured context to decide whether a failure ends the session or only
//! the operation that hit it.
//!
//! ## Error Categories
//!
//! - **Handshake Errors**: the transport connected but no valid welcome
//!   message was established
//! - **Connection Errors**: the server connection dropped after the session
//!   was ready
//! - **Send Errors**: a single frame submission failed at the transport
//! - **Codec Errors**: a message could not be encoded or decoded
//! - **Source Errors**: an operation named a source the server does not
//!   consume
//!
//! ## Fatal vs. Recoverable
//!
//! ```rust
//! use cogent::SessionError;
//!
//! let error = SessionError::send_failed("socket buffer full");
//! assert!(!error.is_fatal());
//!
//! let error = SessionError::handshake("disconnected before welcome");
//! assert!(error.is_fatal());
//! ```

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Main error type for session operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("Could not establish session: {reason}")]
    Handshake { reason: String },

    #[error("Server connection lost")]
    ConnectionLost,

    #[error("Failed to send frame: {reason}")]
    Send {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Codec error in {context}: {details}")]
    Codec { context: String, details: String },

    #[error("Server does not consume source '{source_name}'")]
    UnknownSource { source_name: String },

    #[error("Session is closed")]
    Closed,
}

impl SessionError {
    /// Returns whether this error ends the session.
    ///
    /// Non-fatal errors apply to a single operation; the session stays
    /// usable and the caller may retry or submit other frames.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Handshake { .. } => true,
            SessionError::ConnectionLost => true,
            SessionError::Closed => true,
            SessionError::Send { .. } => false,
            SessionError::Codec { .. } => false,
            SessionError::UnknownSource { .. } => false,
        }
    }

    /// Helper constructor for handshake failures.
    pub fn handshake(reason: impl Into<String>) -> Self {
        SessionError::Handshake { reason: reason.into() }
    }

    /// Helper constructor for send failures.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        SessionError::Send { reason: reason.into(), source: None }
    }

    /// Helper constructor for send failures with an underlying cause.
    pub fn send_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SessionError::Send { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for codec errors.
    pub fn codec(context: impl Into<String>, details: impl Into<String>) -> Self {
        SessionError::Codec { context: context.into(), details: details.into() }
    }

    /// Helper constructor for unknown-source errors.
    pub fn unknown_source(source_name: impl Into<String>) -> Self {
        SessionError::UnknownSource { source_name: source_name.into() }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Send { reason: "I/O error".to_string(), source: Some(Box::new(err)) }
    }
}

/// Why a session ended.
///
/// Delivered exactly once per session through the terminal
/// [`SessionEvent::Closed`](crate::SessionEvent::Closed) event. Callers
/// typically show a different message for a session that never became ready
/// than for one that was lost mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport disconnected before a valid welcome message arrived.
    HandshakeFailure,
    /// The transport disconnected after the session was ready.
    ConnectionLost,
    /// The server reported a fatal result status (no engine for a source,
    /// wrong input format, or an engine crash).
    ServerError,
    /// The session was stopped locally.
    Stopped,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::HandshakeFailure => write!(f, "could not establish session"),
            DisconnectReason::ConnectionLost => write!(f, "server connection lost"),
            DisconnectReason::ServerError => write!(f, "server reported a fatal error"),
            DisconnectReason::Stopped => write!(f, "session stopped"),
        }
    }
}
