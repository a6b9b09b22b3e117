//! Inbound result types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What kind of payload a single result carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Image,
    Text,
    Other,
}

/// Server-reported status for a result batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    /// The server has no engine consuming frames from this source.
    NoEngineForSource,
    /// An engine rejected the frame's encoding.
    WrongInputFormat,
    /// An engine failed while processing the frame.
    EngineError,
    /// Any other non-success status; the batch is dropped but the session
    /// continues.
    Unknown,
}

impl ResultStatus {
    /// Statuses that end the session: the server will never produce useful
    /// results for this client's frames.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ResultStatus::NoEngineForSource
                | ResultStatus::WrongInputFormat
                | ResultStatus::EngineError
        )
    }
}

/// One engine's output within a result batch.
#[derive(Debug, Clone)]
pub struct ResultItem {
    /// Name of the engine that produced this result.
    pub engine_name: String,

    /// Payload kind, so the application can route rendering vs. speech.
    pub kind: PayloadKind,

    /// Opaque result bytes.
    pub payload: Arc<[u8]>,
}

/// The server's results for one acknowledged frame.
///
/// Received as a unit; the dedup gate accepts or drops the whole batch,
/// never individual items.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    /// Source whose frame these results answer.
    pub source_name: String,

    /// Sequence id being acknowledged (or a cumulative high-water mark when
    /// the server aggregates acknowledgments).
    pub frame_seq: u64,

    /// Monotonic engine-state counter used to detect stale batches.
    pub update_count: u64,

    /// Whether this envelope returns the frame's token. Servers running
    /// several engines over one source send more than one batch per frame
    /// and flag only one of them.
    pub return_token: bool,

    /// Server-reported processing status.
    pub status: ResultStatus,

    /// Ordered engine outputs.
    pub results: Vec<ResultItem>,
}
