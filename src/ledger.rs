//! Token-based admission control.
//!
//! The server advertises, per consumed source, how many frames may be in
//! flight at once. The [`TokenLedger`] is the client-side source of truth
//! for that budget: the submission pipeline takes a token before producing
//! a frame and the acknowledgment path gives it back. Blocking acquisition
//! is the backpressure mechanism; there is no outbound queue to grow.
//!
//! One ledger belongs to one session. It starts unseeded, is populated
//! exactly once by the welcome handshake, and is cleared when the session
//! stops so a reconnected session cannot inherit stale counts.
//!
//! ## Locking discipline
//!
//! All counters live behind a single mutex; token operations are O(1) and
//! never touch I/O while holding it. Waiters park on a [`Notify`] and
//! re-check after every broadcast, so `seed`, `release`, and `stop` each
//! wake everything and let the checks sort out who proceeds.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::{Result, SessionError};

#[derive(Default)]
struct LedgerState {
    tokens: HashMap<String, u32>,
    seeded: bool,
    stopped: bool,
}

/// Per-source token counters with blocking and non-blocking acquisition.
pub struct TokenLedger {
    state: Mutex<LedgerState>,
    changed: Notify,
}

impl TokenLedger {
    /// Create an unseeded, running ledger.
    pub fn new() -> Self {
        Self { state: Mutex::new(LedgerState::default()), changed: Notify::new() }
    }

    /// Replace the ledger contents with the given quotas.
    ///
    /// Wakes every blocked [`acquire`](Self::acquire); waiters re-check,
    /// since their source may no longer exist in the new map.
    pub fn seed(&self, quotas: HashMap<String, u32>) {
        {
            let mut state = self.state.lock().expect("ledger lock poisoned");
            debug!(sources = quotas.len(), "seeding token ledger");
            state.tokens = quotas;
            state.seeded = true;
        }
        self.changed.notify_waiters();
    }

    /// Take a token without blocking.
    ///
    /// Returns `false` if the ledger is unseeded or stopped, the source is
    /// unknown, or no token is available.
    pub fn try_acquire(&self, source: &str) -> bool {
        let mut state = self.state.lock().expect("ledger lock poisoned");
        if state.stopped || !state.seeded {
            return false;
        }
        match state.tokens.get_mut(source) {
            Some(count) if *count > 0 => {
                *count -= 1;
                trace!(source, remaining = *count, "token acquired");
                true
            }
            _ => false,
        }
    }

    /// Take a token, waiting until one is available.
    ///
    /// Suspends the caller until the ledger is seeded and a token for
    /// `source` frees up. Returns `false` if the ledger stopped while
    /// waiting, or if the seeded map does not contain `source`.
    pub async fn acquire(&self, source: &str) -> bool {
        let mut notified = pin!(self.changed.notified());
        loop {
            // Register for the next broadcast before checking, so a release
            // racing with the check cannot be missed.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("ledger lock poisoned");
                if state.stopped {
                    debug!(source, "ledger stopped, not waiting for token");
                    return false;
                }
                if state.seeded {
                    match state.tokens.get_mut(source) {
                        None => {
                            debug!(source, "no tokens for unknown source");
                            return false;
                        }
                        Some(0) => {}
                        Some(count) => {
                            *count -= 1;
                            trace!(source, remaining = *count, "token acquired");
                            return true;
                        }
                    }
                }
            }
            trace!(source, "waiting for token");
            notified.as_mut().await;
            notified.set(self.changed.notified());
        }
    }

    /// Return `count` tokens for `source` and wake waiters.
    ///
    /// Releasing for a source the ledger does not know is an error for the
    /// caller to log, not a fatal condition.
    pub fn release(&self, source: &str, count: u32) -> Result<()> {
        {
            let mut state = self.state.lock().expect("ledger lock poisoned");
            match state.tokens.get_mut(source) {
                Some(current) => {
                    *current += count;
                    trace!(source, released = count, available = *current, "tokens released");
                }
                None => return Err(SessionError::unknown_source(source)),
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Stop the ledger: every blocked [`acquire`](Self::acquire) returns
    /// `false` promptly and the counters are cleared.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("ledger lock poisoned");
            state.stopped = true;
            state.tokens.clear();
        }
        self.changed.notify_waiters();
        debug!("token ledger stopped");
    }

    /// Whether [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().expect("ledger lock poisoned").stopped
    }

    /// Whether the seeded map contains `source`. `false` before the seed.
    pub fn knows_source(&self, source: &str) -> bool {
        let state = self.state.lock().expect("ledger lock poisoned");
        state.seeded && state.tokens.contains_key(source)
    }

    /// Remaining tokens for `source`, if the seeded map contains it.
    pub fn available(&self, source: &str) -> Option<u32> {
        self.state.lock().expect("ledger lock poisoned").tokens.get(source).copied()
    }
}

impl Default for TokenLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn seeded(source: &str, count: u32) -> TokenLedger {
        let ledger = TokenLedger::new();
        ledger.seed(HashMap::from([(source.to_string(), count)]));
        ledger
    }

    #[test]
    fn quota_is_exhaustible_and_refillable() {
        let ledger = seeded("camera", 3);
        for _ in 0..3 {
            assert!(ledger.try_acquire("camera"));
        }
        assert!(!ledger.try_acquire("camera"));

        ledger.release("camera", 1).unwrap();
        assert!(ledger.try_acquire("camera"));
        assert!(!ledger.try_acquire("camera"));
    }

    #[test]
    fn try_acquire_is_false_before_seed_and_for_unknown_sources() {
        let ledger = TokenLedger::new();
        assert!(!ledger.try_acquire("camera"));

        ledger.seed(HashMap::from([("camera".to_string(), 1)]));
        assert!(!ledger.try_acquire("audio"));
        assert!(ledger.try_acquire("camera"));
    }

    #[test]
    fn release_for_unknown_source_is_an_error() {
        let ledger = seeded("camera", 1);
        let err = ledger.release("audio", 1).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSource { .. }));
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let ledger = Arc::new(seeded("camera", 1));
        assert!(ledger.acquire("camera").await);

        let waiter = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.acquire("camera").await })
        };

        // Give the waiter time to park before releasing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.release("camera", 1).unwrap();

        let granted = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("acquire should resolve after release")
            .unwrap();
        assert!(granted);
    }

    #[tokio::test]
    async fn acquire_waits_for_seed_then_checks_membership() {
        let ledger = Arc::new(TokenLedger::new());

        let camera = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.acquire("camera").await })
        };
        let audio = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.acquire("audio").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.seed(HashMap::from([("camera".to_string(), 1)]));

        assert!(camera.await.unwrap());
        assert!(!audio.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_releases_every_blocked_acquire() {
        let ledger = Arc::new(seeded("camera", 0));

        let waiters: Vec<_> = (0..50)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.acquire("camera").await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        ledger.stop();

        for waiter in waiters {
            let granted = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("stop must unblock acquire")
                .unwrap();
            assert!(!granted);
        }
    }

    #[tokio::test]
    async fn acquire_after_stop_returns_immediately() {
        let ledger = seeded("camera", 5);
        ledger.stop();
        assert!(!ledger.acquire("camera").await);
        assert!(!ledger.try_acquire("camera"));
    }

    #[test]
    fn stop_clears_counters() {
        let ledger = seeded("camera", 5);
        ledger.stop();
        assert_eq!(ledger.available("camera"), None);
        assert!(!ledger.knows_source("camera"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Counts stay within [0, quota] as long as releases only return
            /// tokens that were actually acquired.
            #[test]
            fn counts_stay_bounded(quota in 0u32..8, ops in proptest::collection::vec(any::<bool>(), 0..64)) {
                let ledger = seeded("camera", quota);
                let mut in_flight = 0u32;
                for acquire in ops {
                    if acquire {
                        if ledger.try_acquire("camera") {
                            in_flight += 1;
                        } else {
                            prop_assert_eq!(ledger.available("camera"), Some(0));
                        }
                    } else if in_flight > 0 {
                        ledger.release("camera", 1).unwrap();
                        in_flight -= 1;
                    }
                    let available = ledger.available("camera").unwrap();
                    prop_assert!(available <= quota);
                    prop_assert_eq!(available + in_flight, quota);
                }
            }
        }
    }
}
