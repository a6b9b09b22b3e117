//! Session lifecycle and the frame submission pipeline.
//!
//! A [`Session`] owns one transport connection from handshake to teardown.
//! It spawns a read task that consumes server messages (the welcome first,
//! result batches after), seeds the token ledger, settles acknowledgments,
//! and forwards accepted results as [`SessionEvent`]s. Outbound traffic
//! goes through [`SourceHandle`]s, one per sensor source, which acquire a
//! token before the frame payload is ever produced.
//!
//! There is no reconnect policy here: when the connection dies, the session
//! emits a single `Closed` event and stays dead. A caller that wants to
//! reconnect builds a new session, which starts with a fresh ledger,
//! tracker, and dedup gate.

mod events;
#[cfg(test)]
mod tests;

pub use events::{SessionEvent, SessionEvents};

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{MeasurementMode, SessionConfig};
use crate::dedup::UpdateGate;
use crate::error::{DisconnectReason, Result, SessionError};
use crate::latency::{LatencyTracker, SentRecord};
use crate::ledger::TokenLedger;
use crate::measurement::MeasurementLog;
use crate::transport::{Connector, MessageSink, MessageStream};
use crate::types::{FrameEnvelope, FramePayload, ResultBatch, ResultStatus, SessionState};
use crate::wire::{ServerMessage, WireCodec};

/// What happened to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The frame went out with this sequence id.
    Sent { sequence_id: u64 },

    /// No token was available (non-blocking submission only). The producer
    /// was never invoked.
    NoToken,

    /// The producer returned `None`; the token was given back.
    Declined,
}

impl SubmitOutcome {
    /// Sequence id of the sent frame, if one went out.
    pub fn sequence_id(&self) -> Option<u64> {
        match self {
            SubmitOutcome::Sent { sequence_id } => Some(*sequence_id),
            _ => None,
        }
    }
}

struct Shared {
    config: SessionConfig,
    codec: Arc<dyn WireCodec>,
    ledger: TokenLedger,
    tracker: LatencyTracker,
    sink: Mutex<Box<dyn MessageSink>>,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    terminated: AtomicBool,
    cancel: CancellationToken,
}

/// Controller for one connection to a cognitive-engine server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use cogent::{Session, SessionConfig, SessionEvent};
/// # async fn demo(
/// #     connector: Box<dyn cogent::Connector>,
/// #     codec: Arc<dyn cogent::WireCodec>,
/// # ) -> cogent::Result<()> {
///
/// let (session, mut events) =
///     Session::connect(connector.as_ref(), "ws://localhost:9099", codec, SessionConfig::default())
///         .await?;
/// session.wait_ready().await?;
///
/// let camera = session.source("camera");
/// camera.submit(|| Some(vec![0u8; 4096].into())).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         SessionEvent::Result(batch) => println!("{} results", batch.results.len()),
///         SessionEvent::Measurement(report) => println!("{:.1} fps", report.interval_fps),
///         SessionEvent::Closed(reason) => println!("session over: {reason}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Connect through the given connector and start a session over the
    /// resulting sink/stream pair.
    pub async fn connect(
        connector: &dyn Connector,
        endpoint: &str,
        codec: Arc<dyn WireCodec>,
        config: SessionConfig,
    ) -> Result<(Session, SessionEvents)> {
        info!(endpoint, "connecting to server");
        let (sink, stream) = connector.connect(endpoint).await?;
        Ok(Self::start(sink, stream, codec, config))
    }

    /// Start a session over an already-connected transport.
    ///
    /// Spawns the read task and returns immediately; the session is in
    /// [`SessionState::AwaitingWelcome`] until the server's welcome message
    /// arrives. Use [`wait_ready`](Self::wait_ready) to block on that.
    pub fn start(
        sink: Box<dyn MessageSink>,
        stream: Box<dyn MessageStream>,
        codec: Arc<dyn WireCodec>,
        config: SessionConfig,
    ) -> (Session, SessionEvents) {
        let (state_tx, _) = watch::channel(SessionState::AwaitingWelcome);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            ledger: TokenLedger::new(),
            tracker: LatencyTracker::new(config.measurement.retains_records()),
            config,
            codec,
            sink: Mutex::new(sink),
            state_tx,
            events_tx,
            terminated: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let reader = Arc::clone(&shared);
        tokio::spawn(async move {
            read_loop(reader, stream).await;
        });

        info!("session started, awaiting welcome");
        (Session { shared }, SessionEvents::new(events_rx))
    }

    /// Create a submission handle for a named source.
    ///
    /// Sequence ids are per handle; create one handle per source and share
    /// it, rather than one handle per frame.
    pub fn source(&self, name: impl Into<String>) -> SourceHandle {
        SourceHandle {
            name: name.into(),
            next_seq: AtomicU64::new(0),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    /// Lifecycle states as a stream, current state first.
    pub fn state_updates(&self) -> impl futures::Stream<Item = SessionState> + 'static {
        WatchStream::new(self.shared.state_tx.subscribe())
    }

    /// Wait until the handshake completes.
    ///
    /// Returns an error if the session ends before reaching
    /// [`SessionState::Ready`].
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state_rx = self.shared.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|state| {
                matches!(
                    state,
                    SessionState::Ready
                        | SessionState::Closing
                        | SessionState::Failed
                        | SessionState::NotConnected
                )
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        match state {
            SessionState::Ready => Ok(()),
            SessionState::Failed => {
                Err(SessionError::handshake("session failed before becoming ready"))
            }
            _ => Err(SessionError::Closed),
        }
    }

    /// Whether the server's welcome listed this source.
    ///
    /// `false` before the handshake completes.
    pub fn accepts_source(&self, name: &str) -> bool {
        self.shared.ledger.knows_source(name)
    }

    /// Remaining tokens for a source, for diagnostics.
    pub fn available_tokens(&self, name: &str) -> Option<u32> {
        self.shared.ledger.available(name)
    }

    /// Whether the session has not yet terminated.
    pub fn is_running(&self) -> bool {
        !self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Stop the session.
    ///
    /// Idempotent and safe to call concurrently: the terminal `Closed`
    /// event fires exactly once no matter how many callers race. Every
    /// blocked submission returns promptly.
    pub async fn stop(&self) {
        self.shared.finish(DisconnectReason::Stopped).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Tear down without the sink close; the transport cleans up when
        // the boxed sink itself drops.
        self.shared.begin_finish(DisconnectReason::Stopped);
    }
}

/// Submission handle for one sensor source.
///
/// Cheap to use from its own task; sends from concurrent handles are
/// serialized on the wire by the session.
pub struct SourceHandle {
    name: String,
    next_seq: AtomicU64,
    shared: Arc<Shared>,
}

impl SourceHandle {
    /// Source name this handle submits for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a frame, waiting for a token.
    ///
    /// Blocks until the server grants capacity, then invokes `produce` to
    /// materialize the payload. The producer is never called without a
    /// token, so encode work is not wasted on frames that cannot be sent.
    /// A producer may decline by returning `None`; the token goes back.
    pub async fn submit<F>(&self, produce: F) -> Result<SubmitOutcome>
    where
        F: FnOnce() -> Option<FramePayload>,
    {
        if !self.shared.ledger.acquire(&self.name).await {
            return Err(self.acquire_error());
        }
        self.submit_with_token(produce).await
    }

    /// Submit a frame only if a token is free right now.
    ///
    /// For real-time capture that should drop frames rather than stall:
    /// returns [`SubmitOutcome::NoToken`] without invoking the producer
    /// when the source is out of capacity.
    pub async fn try_submit<F>(&self, produce: F) -> Result<SubmitOutcome>
    where
        F: FnOnce() -> Option<FramePayload>,
    {
        if !self.shared.ledger.try_acquire(&self.name) {
            if self.shared.ledger.is_stopped() {
                return Err(SessionError::Closed);
            }
            return Ok(SubmitOutcome::NoToken);
        }
        self.submit_with_token(produce).await
    }

    async fn submit_with_token<F>(&self, produce: F) -> Result<SubmitOutcome>
    where
        F: FnOnce() -> Option<FramePayload>,
    {
        let sequence_id = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let Some(payload) = produce() else {
            debug!(source = %self.name, "producer declined, returning token");
            self.give_back_token();
            return Ok(SubmitOutcome::Declined);
        };
        let encoded_at = Instant::now();

        let envelope = FrameEnvelope {
            source_name: self.name.clone(),
            sequence_id,
            payload: payload.payload,
            extras: payload.extras,
            created_at: encoded_at,
        };
        let byte_size = envelope.byte_size();

        let message = match self.shared.codec.encode_frame(&envelope) {
            Ok(message) => message,
            Err(e) => {
                self.give_back_token();
                return Err(e);
            }
        };

        {
            let mut sink = self.shared.sink.lock().await;
            if let Err(e) = sink.send(message).await {
                drop(sink);
                warn!(source = %self.name, sequence_id, error = %e, "send failed");
                self.give_back_token();
                return Err(e);
            }
        }

        self.shared.tracker.record_sent(
            &self.name,
            sequence_id,
            SentRecord { sent_at: Instant::now(), encoded_at, byte_size },
        );
        trace!(source = %self.name, sequence_id, byte_size, "frame sent");
        Ok(SubmitOutcome::Sent { sequence_id })
    }

    fn acquire_error(&self) -> SessionError {
        if self.shared.ledger.is_stopped() {
            SessionError::Closed
        } else {
            SessionError::unknown_source(&self.name)
        }
    }

    fn give_back_token(&self) {
        if let Err(e) = self.shared.ledger.release(&self.name, 1) {
            // The ledger may have stopped or been reseeded mid-flight.
            debug!(source = %self.name, error = %e, "token not returned");
        }
    }
}

impl Shared {
    async fn finish(&self, reason: DisconnectReason) {
        if !self.begin_finish(reason) {
            return;
        }
        self.sink.lock().await.close().await;
        if reason == DisconnectReason::Stopped {
            self.state_tx.send_replace(SessionState::NotConnected);
        }
    }

    /// Synchronous teardown. Returns `true` for exactly one caller.
    fn begin_finish(&self, reason: DisconnectReason) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        let state = match reason {
            DisconnectReason::Stopped => SessionState::Closing,
            _ => SessionState::Failed,
        };
        self.state_tx.send_replace(state);
        self.ledger.stop();
        self.tracker.clear();
        self.cancel.cancel();
        let _ = self.events_tx.send(SessionEvent::Closed(reason));
        info!(%reason, "session ended");
        true
    }

    async fn handle_message(
        &self,
        bytes: &[u8],
        gate: &mut UpdateGate,
        measurement: &mut Option<MeasurementLog>,
    ) -> ControlFlow<()> {
        let awaiting = *self.state_tx.borrow() == SessionState::AwaitingWelcome;
        match self.codec.decode_server_message(bytes) {
            Ok(ServerMessage::Welcome(welcome)) => {
                let quotas = welcome.quotas(self.config.token_ceiling);
                info!(
                    sources = quotas.len(),
                    tokens_per_source = welcome.tokens_per_source.min(self.config.token_ceiling),
                    "welcome received, seeding token ledger"
                );
                self.ledger.seed(quotas);
                if awaiting {
                    self.state_tx.send_replace(SessionState::Ready);
                    info!("session ready");
                } else {
                    warn!("welcome received after handshake, ledger reseeded");
                }
                ControlFlow::Continue(())
            }
            Ok(ServerMessage::Result(batch)) => {
                if awaiting {
                    error!("server sent results before a welcome message");
                    self.finish(DisconnectReason::HandshakeFailure).await;
                    return ControlFlow::Break(());
                }
                self.handle_result(batch, gate, measurement).await
            }
            Err(e) if awaiting => {
                error!(error = %e, "malformed welcome message");
                self.finish(DisconnectReason::HandshakeFailure).await;
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(error = %e, "skipping undecodable server message");
                ControlFlow::Continue(())
            }
        }
    }

    async fn handle_result(
        &self,
        batch: ResultBatch,
        gate: &mut UpdateGate,
        measurement: &mut Option<MeasurementLog>,
    ) -> ControlFlow<()> {
        trace!(source = %batch.source_name, sequence_id = batch.frame_seq, "result received");

        // Tokens come back before any policy can drop the batch.
        if batch.return_token {
            let now = Instant::now();
            let summary = self.tracker.record_ack(&batch.source_name, batch.frame_seq, now);
            if summary.released > 0
                && let Err(e) = self.ledger.release(&batch.source_name, summary.released)
            {
                warn!(error = %e, "could not return tokens");
            }
            if let (Some(log), Some(rtt)) = (measurement.as_mut(), summary.rtt)
                && let Some(report) = log.record(&batch.source_name, rtt, now)
            {
                let _ = self.events_tx.send(SessionEvent::Measurement(report));
            }
        }

        if batch.status.is_fatal() {
            error!(
                status = ?batch.status,
                source = %batch.source_name,
                "fatal result status from server"
            );
            self.finish(DisconnectReason::ServerError).await;
            return ControlFlow::Break(());
        }
        if batch.status != ResultStatus::Success {
            warn!(status = ?batch.status, "dropping result batch with non-success status");
            return ControlFlow::Continue(());
        }
        if !gate.accept(batch.update_count) {
            return ControlFlow::Continue(());
        }

        let _ = self.events_tx.send(SessionEvent::Result(batch));
        ControlFlow::Continue(())
    }
}

/// Read task: the only consumer of the inbound message stream.
async fn read_loop(shared: Arc<Shared>, mut stream: Box<dyn MessageStream>) {
    debug!("read task started");
    let mut gate = UpdateGate::new(shared.config.strict_result_order);
    let mut measurement = match shared.config.measurement {
        MeasurementMode::Interval { report_every } => {
            Some(MeasurementLog::new(report_every, Instant::now()))
        }
        MeasurementMode::Off => None,
    };

    loop {
        let message = tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("read task cancelled");
                return;
            }
            message = stream.next_message() => message,
        };

        let Some(bytes) = message else {
            let reason = if *shared.state_tx.borrow() == SessionState::AwaitingWelcome {
                DisconnectReason::HandshakeFailure
            } else {
                DisconnectReason::ConnectionLost
            };
            warn!(%reason, "transport disconnected");
            shared.finish(reason).await;
            return;
        };

        if shared.handle_message(&bytes, &mut gate, &mut measurement).await.is_break() {
            return;
        }
    }
}
