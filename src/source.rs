//! Push-style frame sources.
//!
//! Capture layers (camera callbacks, audio buffers) usually push frames at
//! their own rate, while the submission pipeline pulls a frame only once a
//! token is granted. [`push_source`] bridges the two with a latest-wins
//! slot: pushes overwrite, never queue, so the frame taken at token-grant
//! time is always the freshest one and stale frames are simply dropped.
//!
//! ```rust,no_run
//! # async fn demo(handle: cogent::SourceHandle) -> cogent::Result<()> {
//! use cogent::source::push_source;
//!
//! let (pusher, mut source) = push_source();
//! // capture thread: pusher.push(encoded_frame);
//! while source.wait_frame().await {
//!     handle.submit(|| source.take_latest()).await?;
//! }
//! # Ok(())
//! # }
//! ```

use tokio::sync::watch;

use crate::types::FramePayload;

/// Producer half: hand frames in from any thread.
#[derive(Clone)]
pub struct PushHandle {
    tx: watch::Sender<Option<FramePayload>>,
}

impl PushHandle {
    /// Publish a frame, replacing any frame not yet taken.
    pub fn push(&self, payload: impl Into<FramePayload>) {
        let _ = self.tx.send(Some(payload.into()));
    }
}

/// Consumer half: awaited by the submission loop.
pub struct PushSource {
    rx: watch::Receiver<Option<FramePayload>>,
    // Waiting marks the slot seen at the channel level, so availability is
    // tracked here until the frame is actually taken.
    pending: bool,
}

impl PushSource {
    /// Wait until an untaken frame is available.
    ///
    /// Returns `false` when every [`PushHandle`] has been dropped and no
    /// new frame will ever arrive.
    pub async fn wait_frame(&mut self) -> bool {
        if self.pending {
            return true;
        }
        match self.rx.changed().await {
            Ok(()) => {
                self.pending = true;
                true
            }
            Err(_) => false,
        }
    }

    /// Take the freshest untaken frame, if any.
    pub fn take_latest(&mut self) -> Option<FramePayload> {
        if !self.pending && !self.rx.has_changed().unwrap_or(false) {
            return None;
        }
        self.pending = false;
        self.rx.borrow_and_update().clone()
    }
}

/// Create a connected latest-wins push source.
pub fn push_source() -> (PushHandle, PushSource) {
    let (tx, rx) = watch::channel(None);
    (PushHandle { tx }, PushSource { rx, pending: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_frame_wins() {
        let (pusher, mut source) = push_source();
        pusher.push(vec![1u8]);
        pusher.push(vec![2u8]);

        assert!(source.wait_frame().await);
        let frame = source.take_latest().expect("frame available");
        assert_eq!(frame.payload.as_ref(), &[2u8]);

        // Both pushes were collapsed into one take.
        assert!(source.take_latest().is_none());
    }

    #[tokio::test]
    async fn take_without_wait_sees_pushed_frame() {
        let (pusher, mut source) = push_source();
        assert!(source.take_latest().is_none());
        pusher.push(vec![3u8]);
        assert_eq!(source.take_latest().unwrap().payload.as_ref(), &[3u8]);
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_source() {
        let (pusher, mut source) = push_source();
        drop(pusher);
        assert!(!source.wait_frame().await);
    }

    #[tokio::test]
    async fn final_frame_survives_handle_drop() {
        let (pusher, mut source) = push_source();
        pusher.push(vec![9u8]);
        drop(pusher);

        assert!(source.wait_frame().await);
        assert_eq!(source.take_latest().unwrap().payload.as_ref(), &[9u8]);
        assert!(!source.wait_frame().await);
    }

    #[tokio::test]
    async fn wait_then_push_wakes_the_loop() {
        let (pusher, mut source) = push_source();
        let waiter = tokio::spawn(async move {
            let available = source.wait_frame().await;
            (available, source.take_latest())
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        pusher.push(vec![7u8]);

        let (available, frame) = waiter.await.unwrap();
        assert!(available);
        assert_eq!(frame.unwrap().payload.as_ref(), &[7u8]);
    }
}
