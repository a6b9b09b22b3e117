//! Session event delivery.

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::DisconnectReason;
use crate::measurement::SourceReport;
use crate::types::ResultBatch;

/// Something the session wants the application to see.
///
/// Events are delivered from whatever execution context the transport
/// delivers messages on; consumers must not assume a specific task.
#[derive(Debug)]
pub enum SessionEvent {
    /// An accepted result batch.
    Result(ResultBatch),

    /// A measurement interval completed (interval measurement mode only).
    Measurement(SourceReport),

    /// The session ended. Always the last event, delivered exactly once.
    Closed(DisconnectReason),
}

pin_project! {
    /// Stream of [`SessionEvent`]s for one session.
    ///
    /// Terminates after yielding the single `Closed` event, even if the
    /// sender side has not been dropped yet.
    pub struct SessionEvents {
        #[pin]
        inner: UnboundedReceiverStream<SessionEvent>,
        done: bool,
    }
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { inner: UnboundedReceiverStream::new(rx), done: false }
    }

    /// Receive the next event. `None` once the session has closed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for SessionEvents {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match ready!(this.inner.poll_next(cx)) {
            Some(event) => {
                if matches!(event, SessionEvent::Closed(_)) {
                    *this.done = true;
                }
                Poll::Ready(Some(event))
            }
            None => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_ends_after_closed_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = SessionEvents::new(rx);

        tx.send(SessionEvent::Closed(DisconnectReason::Stopped)).unwrap();
        // A buggy second terminal event must not reach the consumer.
        tx.send(SessionEvent::Closed(DisconnectReason::ConnectionLost)).unwrap();

        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Closed(DisconnectReason::Stopped))
        ));
        assert!(events.recv().await.is_none());
    }
}
