//! Outbound frame types.

use std::sync::Arc;
use std::time::Instant;

/// A frame payload produced by a sensor source.
///
/// This is what a producer closure returns: the encoded sensor bytes plus
/// optional application metadata. The submission pipeline wraps it into a
/// [`FrameEnvelope`] once a token has been granted.
#[derive(Debug, Clone)]
pub struct FramePayload {
    /// Encoded frame bytes (zero-copy via Arc).
    pub payload: Arc<[u8]>,

    /// Opaque application metadata forwarded to the server untouched.
    pub extras: Option<Arc<[u8]>>,
}

impl FramePayload {
    /// Create a payload without extras.
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        Self { payload: payload.into(), extras: None }
    }

    /// Attach opaque metadata to the payload.
    pub fn with_extras(mut self, extras: impl Into<Arc<[u8]>>) -> Self {
        self.extras = Some(extras.into());
        self
    }
}

impl From<Vec<u8>> for FramePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// A frame stamped and ready for the wire.
///
/// Owned by the submission pipeline from creation until hand-off to the
/// transport; immutable once sent.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    /// Name of the producing source; the unit of token accounting.
    pub source_name: String,

    /// Strictly increasing per-source sequence id, starting at 1.
    pub sequence_id: u64,

    /// Encoded frame bytes.
    pub payload: Arc<[u8]>,

    /// Opaque application metadata.
    pub extras: Option<Arc<[u8]>>,

    /// When the payload was materialized, for latency accounting.
    pub created_at: Instant,
}

impl FrameEnvelope {
    /// Total payload size in bytes, extras included.
    pub fn byte_size(&self) -> usize {
        self.payload.len() + self.extras.as_ref().map_or(0, |e| e.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_includes_extras() {
        let envelope = FrameEnvelope {
            source_name: "camera".to_string(),
            sequence_id: 1,
            payload: vec![0u8; 16].into(),
            extras: Some(vec![0u8; 4].into()),
            created_at: Instant::now(),
        };
        assert_eq!(envelope.byte_size(), 20);
    }

    #[test]
    fn payload_builder_attaches_extras() {
        let payload = FramePayload::new(vec![1, 2, 3]).with_extras(vec![9]);
        assert_eq!(payload.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(payload.extras.as_deref(), Some([9].as_slice()));
    }
}
