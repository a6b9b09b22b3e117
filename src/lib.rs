//! Modern, type-safe Rust client runtime for cognitive-engine sensor streaming.
//!
//! Cogent keeps a wearable or mobile client's sensor streams flowing to a
//! remote cognitive-engine server without overrunning it: the server
//! advertises a per-source token quota during the handshake, and every
//! frame submission takes a token before the frame payload is even
//! produced.
//!
//! # Features
//!
//! - **Token-gated backpressure**: blocking or drop-on-full submission per
//!   source, paced by server acknowledgments
//! - **Lazy frame production**: producers run only when capacity exists, so
//!   no CPU is burned encoding frames that would be dropped
//! - **Cumulative acknowledgments**: correct token accounting even when the
//!   server only acknowledges the newest frame
//! - **Stale-result filtering**: a monotonic update counter keeps regressed
//!   server state away from the application
//! - **Transport-agnostic**: bring any bidirectional message channel and
//!   wire encoding via the [`transport`] and [`wire`] trait seams
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cogent::test_utils::{TestCodec, transport_pair};
//! use cogent::{Session, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> cogent::Result<()> {
//!     // An in-memory stand-in for a real transport implementation.
//!     let (sink, stream, server) = transport_pair();
//!     server.send_welcome(&["camera"], 2);
//!
//!     let (session, mut events) =
//!         Session::start(sink, stream, Arc::new(TestCodec), SessionConfig::default());
//!     session.wait_ready().await?;
//!
//!     let camera = session.source("camera");
//!     camera.submit(|| Some(vec![0u8; 4096].into())).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::Result(batch) = event {
//!             println!("got {} results", batch.results.len());
//!             break;
//!         }
//!     }
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod test_utils;
pub mod types;

// Admission control and accounting
pub mod dedup;
pub mod latency;
pub mod ledger;
pub mod measurement;

// Session architecture
pub mod session;
pub mod source;
pub mod transport;
pub mod wire;

// Core exports
pub use config::{MeasurementMode, SessionConfig};
pub use error::*;
pub use types::*;

// Admission control exports
pub use dedup::UpdateGate;
pub use latency::{AckSummary, LatencyTracker, SentRecord};
pub use ledger::TokenLedger;
pub use measurement::SourceReport;

// Session exports
pub use session::{Session, SessionEvent, SessionEvents, SourceHandle, SubmitOutcome};
pub use source::{PushHandle, PushSource, push_source};
pub use transport::{Connector, MessageSink, MessageStream};
pub use wire::{ServerMessage, WireCodec};
