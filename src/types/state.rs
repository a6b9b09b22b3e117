//! Session lifecycle states.

/// Where a session is in its lifecycle.
///
/// Exactly one instance per connection attempt, owned by the
/// [`Session`](crate::Session) and published through a watch channel. There
/// is no internal reconnect: a failed session stays in [`Failed`] and a new
/// session starts over at [`NotConnected`].
///
/// [`Failed`]: SessionState::Failed
/// [`NotConnected`]: SessionState::NotConnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport connection.
    NotConnected,
    /// Connected, waiting for the server's welcome message. No frame may be
    /// sent in this state.
    AwaitingWelcome,
    /// Handshake complete; the token ledger is seeded and frames flow.
    Ready,
    /// Local stop in progress.
    Closing,
    /// The session ended on an error and will not recover.
    Failed,
}

impl SessionState {
    /// Whether the session has reached a state it will never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::NotConnected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::NotConnected => "not connected",
            SessionState::AwaitingWelcome => "awaiting welcome",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
