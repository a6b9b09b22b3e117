//! Transport trait seam.
//!
//! The session layer does not implement WebSocket/TCP/TLS plumbing. It
//! consumes a connection abstraction that can send a message, receive a
//! message, and report disconnection. Implementations must guarantee that
//! one [`MessageSink::send`] delivers exactly one logical message, that one
//! [`MessageStream::next_message`] yields exactly one logical message, and
//! that per-connection message order is preserved.

use async_trait::async_trait;

use crate::Result;

/// Write half of a server connection.
#[async_trait]
pub trait MessageSink: Send + 'static {
    /// Deliver one logical message to the server.
    ///
    /// Returns an error if the message could not be handed to the transport;
    /// the session treats this as a per-frame failure, not a disconnect.
    async fn send(&mut self, message: Vec<u8>) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Read half of a server connection.
#[async_trait]
pub trait MessageStream: Send + 'static {
    /// Receive the next logical message.
    ///
    /// Returns:
    /// - `Some(bytes)` - one complete message from the server
    /// - `None` - the connection is gone (closed, reset, or failed)
    async fn next_message(&mut self) -> Option<Vec<u8>>;
}

/// Factory for server connections.
///
/// One `connect` call yields one sink/stream pair backing one session. The
/// session never reconnects through this trait; a reconnecting caller
/// creates a new session from a fresh pair.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to the given endpoint.
    async fn connect(&self, endpoint: &str)
    -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>)>;
}
