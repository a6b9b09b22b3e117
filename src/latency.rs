//! Sent-frame records and round-trip accounting.
//!
//! Every sent frame leaves a [`SentRecord`] behind, keyed by source and
//! sequence id. The acknowledgment path consumes those records to compute
//! round-trip time and, crucially, to decide how many tokens to return:
//! servers are free to acknowledge only the newest frame, so an ack for
//! sequence N implicitly acknowledges every outstanding record at or below
//! N (cumulative acknowledgment). Per-frame acknowledgment is the special
//! case where the gap is always empty.
//!
//! Late or duplicate acknowledgments (at or below the high-water mark)
//! never release tokens a second time; in measurement mode they still yield
//! a round-trip sample, since records are retained for post-hoc analysis.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

/// Timing and size of one sent frame.
#[derive(Debug, Clone, Copy)]
pub struct SentRecord {
    /// When the frame was handed to the transport.
    pub sent_at: Instant,
    /// When the producer materialized the payload.
    pub encoded_at: Instant,
    /// Wire payload size in bytes.
    pub byte_size: usize,
}

/// Outcome of processing one acknowledgment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckSummary {
    /// Tokens to return to the ledger: one per record the acknowledgment
    /// covered, explicitly or implicitly.
    pub released: u32,
    /// Round-trip time of the directly acknowledged frame, when its record
    /// was still known.
    pub rtt: Option<Duration>,
    /// Wire size of the directly acknowledged frame.
    pub byte_size: Option<usize>,
}

#[derive(Default)]
struct SourceLog {
    records: BTreeMap<u64, SentRecord>,
    last_acked: u64,
}

/// Tracks in-flight frames per source and settles acknowledgments.
///
/// Shared between the submission path and the acknowledgment path; all
/// state sits behind one mutex and operations never block on I/O.
pub struct LatencyTracker {
    sources: Mutex<HashMap<String, SourceLog>>,
    retain: bool,
}

impl LatencyTracker {
    /// Create a tracker. With `retain` set, acknowledged records are kept
    /// so late acknowledgments can still be matched (measurement mode).
    pub fn new(retain: bool) -> Self {
        Self { sources: Mutex::new(HashMap::new()), retain }
    }

    /// Record a frame as sent.
    pub fn record_sent(&self, source: &str, sequence_id: u64, record: SentRecord) {
        let mut sources = self.sources.lock().expect("tracker lock poisoned");
        let log = sources.entry(source.to_string()).or_default();
        log.records.insert(sequence_id, record);
        trace!(source, sequence_id, outstanding = log.records.len(), "frame recorded");
    }

    /// Settle an acknowledgment for `sequence_id` on `source`.
    ///
    /// Covers every outstanding record in `(last_acked, sequence_id]` in
    /// increasing order and advances the high-water mark. Acknowledgments
    /// for unknown sources or already-settled ids are tolerated and release
    /// nothing.
    pub fn record_ack(&self, source: &str, sequence_id: u64, now: Instant) -> AckSummary {
        let mut sources = self.sources.lock().expect("tracker lock poisoned");
        let Some(log) = sources.get_mut(source) else {
            return AckSummary::default();
        };

        if sequence_id <= log.last_acked {
            // Late or duplicate ack: no tokens, but a retained record still
            // gives the measurement path its sample.
            let record = log.records.get(&sequence_id);
            return AckSummary {
                released: 0,
                rtt: record.map(|r| now.saturating_duration_since(r.sent_at)),
                byte_size: record.map(|r| r.byte_size),
            };
        }

        let covered: Vec<u64> =
            log.records.range(log.last_acked + 1..=sequence_id).map(|(id, _)| *id).collect();

        let mut summary = AckSummary { released: covered.len() as u32, ..Default::default() };
        for id in covered {
            let record = if self.retain {
                log.records[&id]
            } else {
                log.records.remove(&id).expect("record listed but missing")
            };
            if id == sequence_id {
                summary.rtt = Some(now.saturating_duration_since(record.sent_at));
                summary.byte_size = Some(record.byte_size);
            }
        }
        log.last_acked = sequence_id;

        trace!(
            source,
            sequence_id,
            released = summary.released,
            rtt_us = summary.rtt.map(|d| d.as_micros() as u64),
            "ack settled"
        );
        summary
    }

    /// Number of unacknowledged frames for `source`.
    pub fn outstanding(&self, source: &str) -> usize {
        let sources = self.sources.lock().expect("tracker lock poisoned");
        match sources.get(source) {
            Some(log) if self.retain => {
                log.records.range(log.last_acked + 1..).count()
            }
            Some(log) => log.records.len(),
            None => 0,
        }
    }

    /// Drop all records; called on session teardown.
    pub fn clear(&self) {
        self.sources.lock().expect("tracker lock poisoned").clear();
    }
}
