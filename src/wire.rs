//! Wire codec trait seam.
//!
//! Business payloads are opaque bytes at this layer; only the control
//! structure of the protocol is modeled. A [`WireCodec`] implementation
//! (protobuf, JSON, whatever the deployment speaks) turns inbound message
//! bytes into a [`ServerMessage`] and an outbound [`FrameEnvelope`] into
//! message bytes.

use crate::Result;
use crate::types::{FrameEnvelope, ResultBatch, Welcome};

/// A decoded message from the server.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// The handshake declaration of consumed sources and token quota.
    Welcome(Welcome),
    /// Results and acknowledgment for one frame.
    Result(ResultBatch),
}

/// Encodes outbound frames and decodes inbound server messages.
///
/// Implementations must be cheap to call from the submission path: encoding
/// happens while the caller awaits the send, after the token was granted.
pub trait WireCodec: Send + Sync + 'static {
    /// Encode a stamped frame envelope into one wire message.
    fn encode_frame(&self, envelope: &FrameEnvelope) -> Result<Vec<u8>>;

    /// Decode one wire message from the server.
    ///
    /// Errors from this method do not end the session on their own: a
    /// malformed message after the handshake is logged and skipped, while a
    /// malformed first message fails the handshake.
    fn decode_server_message(&self, message: &[u8]) -> Result<ServerMessage>;
}
