//! Core types for the streaming session.
//!
//! ## Architecture
//!
//! - [`FrameEnvelope`] is the unit that flows out: one sensor frame stamped
//!   with its source and sequence id, payload shared zero-copy via `Arc`
//! - [`ResultBatch`] is the unit that flows in: the server's results for one
//!   acknowledged frame, accepted or dropped wholesale
//! - [`Welcome`] is the server's handshake declaration of consumed sources
//!   and their token quota
//! - [`SessionState`] tracks the connection lifecycle, published through a
//!   watch channel
//!
//! Payload bytes are opaque at this layer. Encoding a frame for the wire and
//! decoding server messages belong to the [`WireCodec`](crate::WireCodec)
//! implementation supplied by the application.

mod envelope;
mod result;
mod state;
mod welcome;

pub use envelope::{FrameEnvelope, FramePayload};
pub use result::{PayloadKind, ResultBatch, ResultItem, ResultStatus};
pub use state::SessionState;
pub use welcome::Welcome;
