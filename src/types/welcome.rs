//! The server's handshake message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// First message a server sends after the transport connects.
///
/// Declares which sources the server consumes and how many frames may be in
/// flight per source. A session is not ready until this arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Names of the sources the server will consume frames from.
    pub sources_consumed: Vec<String>,

    /// Server-advertised token quota, applied to every consumed source.
    pub tokens_per_source: u32,
}

impl Welcome {
    /// Build the per-source quota map, clamping the advertised quota to the
    /// client-side ceiling.
    pub fn quotas(&self, ceiling: u32) -> HashMap<String, u32> {
        let tokens = self.tokens_per_source.min(ceiling);
        self.sources_consumed.iter().map(|name| (name.clone(), tokens)).collect()
    }
}
