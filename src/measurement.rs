//! Per-source throughput and round-trip statistics.
//!
//! When [`MeasurementMode::Interval`](crate::config::MeasurementMode) is
//! on, the session aggregates acknowledged-frame samples per source and
//! emits a [`SourceReport`] every `report_every` acknowledgments: frames
//! per second since the session started, frames per second over the last
//! interval, and the average round-trip time over that interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

/// Rolling statistics for one source over one reporting interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    /// Source the report covers.
    pub source_name: String,
    /// Acknowledged frames since the session started.
    pub acked_frames: u64,
    /// Frames per second since the session started.
    pub overall_fps: f64,
    /// Frames per second over the reporting interval.
    pub interval_fps: f64,
    /// Mean round-trip time over the reporting interval.
    pub average_rtt: Duration,
}

struct SourceStats {
    acked: u64,
    interval_started: Instant,
    interval_acked: u32,
    interval_rtt: Duration,
}

impl SourceStats {
    fn new(now: Instant) -> Self {
        Self { acked: 0, interval_started: now, interval_acked: 0, interval_rtt: Duration::ZERO }
    }
}

/// Aggregates round-trip samples into interval reports.
///
/// Driven from a single task (the session's read loop); not synchronized.
pub struct MeasurementLog {
    report_every: u32,
    started: Instant,
    sources: HashMap<String, SourceStats>,
}

impl MeasurementLog {
    /// Create a log reporting every `report_every` acknowledged frames.
    pub fn new(report_every: u32, now: Instant) -> Self {
        Self { report_every: report_every.max(1), started: now, sources: HashMap::new() }
    }

    /// Record one acknowledged frame's round trip. Returns a report when
    /// the interval is complete.
    pub fn record(&mut self, source: &str, rtt: Duration, now: Instant) -> Option<SourceReport> {
        let stats =
            self.sources.entry(source.to_string()).or_insert_with(|| SourceStats::new(now));
        stats.acked += 1;
        stats.interval_acked += 1;
        stats.interval_rtt += rtt;

        if stats.interval_acked < self.report_every {
            return None;
        }

        let session_elapsed = now.saturating_duration_since(self.started);
        let interval_elapsed = now.saturating_duration_since(stats.interval_started);
        let report = SourceReport {
            source_name: source.to_string(),
            acked_frames: stats.acked,
            overall_fps: fps(stats.acked, session_elapsed),
            interval_fps: fps(u64::from(stats.interval_acked), interval_elapsed),
            average_rtt: stats.interval_rtt / stats.interval_acked,
        };
        info!(
            source,
            overall_fps = report.overall_fps,
            interval_fps = report.interval_fps,
            avg_rtt_ms = report.average_rtt.as_millis() as u64,
            "measurement interval"
        );

        stats.interval_started = now;
        stats.interval_acked = 0;
        stats.interval_rtt = Duration::ZERO;
        Some(report)
    }
}

fn fps(frames: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    frames as f64 / elapsed.as_secs_f64()
}
