//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::{Result, SessionError};

/// Default ceiling on the per-source token quota.
///
/// The server advertises its own quota in the welcome message; the client
/// clamps it to this ceiling to bound the encode backlog and memory held by
/// in-flight frames.
pub const DEFAULT_TOKEN_CEILING: u32 = 5;

/// Number of acknowledged frames between measurement reports.
pub const DEFAULT_REPORT_EVERY: u32 = 10;

/// Per-source round-trip measurement behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    /// No measurement. Sent-frame records are dropped as soon as they are
    /// acknowledged.
    Off,

    /// Emit a [`SourceReport`](crate::measurement::SourceReport) every
    /// `report_every` acknowledged frames, and retain sent-frame records so
    /// late acknowledgments can still be matched after the fact.
    Interval { report_every: u32 },
}

impl MeasurementMode {
    /// Whether sent-frame records should be retained after acknowledgment.
    pub fn retains_records(self) -> bool {
        matches!(self, MeasurementMode::Interval { .. })
    }
}

/// Configuration for a streaming session.
///
/// # Examples
///
/// ```rust
/// use cogent::SessionConfig;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.token_ceiling, cogent::config::DEFAULT_TOKEN_CEILING);
///
/// let config = SessionConfig::from_yaml("token_ceiling: 2\nstrict_result_order: false\n")
///     .expect("valid config");
/// assert_eq!(config.token_ceiling, 2);
/// assert!(!config.strict_result_order);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound applied to the server-advertised per-source token quota.
    pub token_ceiling: u32,

    /// Drop result batches whose engine update count is not strictly greater
    /// than the last accepted one. Protects the application from output
    /// regressing to server state rebuilt from a stale frame.
    pub strict_result_order: bool,

    /// Round-trip measurement behavior.
    pub measurement: MeasurementMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ceiling: DEFAULT_TOKEN_CEILING,
            strict_result_order: true,
            measurement: MeasurementMode::Off,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from a YAML document.
    ///
    /// Missing fields take their defaults, so a partial document is valid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| SessionError::codec("session config", e.to_string()))
    }

    /// Convenience constructor enabling interval measurement.
    pub fn with_measurement(mut self, report_every: u32) -> Self {
        self.measurement = MeasurementMode::Interval { report_every };
        self
    }
}
