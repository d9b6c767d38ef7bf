//! Relay stream implementing `futures::Stream`.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_sink_released;
use crate::state::{ReadState, Shared};
use std::fmt;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::stream::{FusedStream, Stream};
use tracing::{debug, trace};

/// The readable half of a [`GuaranteeChannel`](crate::GuaranteeChannel).
///
/// Re-emits the inner stream's events unchanged. The inner stream is not
/// polled until this stream is polled for the first time.
///
/// # Termination
///
/// The relay yields `None` when either:
/// - the inner stream ends, in which case the paired sink is marked
///   disconnected *before* `None` is returned, or
/// - the paired sink is closed, in which case the inner stream is dropped
///   and the relay ends even if the inner stream had more to give.
///
/// Once ended the relay stays ended.
pub struct ChannelStream<T, E, K> {
    shared: Shared<T, E, K>,
}

impl<T, E, K> ChannelStream<T, E, K> {
    pub(crate) fn new(shared: Shared<T, E, K>) -> Self {
        Self { shared }
    }

    /// Returns `true` if the relay will not yield any more events.
    pub fn is_disconnected(&self) -> bool {
        self.shared.lock().read.is_terminated()
    }
}

impl<T, E, K> Stream for ChannelStream<T, E, K> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut inner = {
            let mut core = self.shared.lock();
            if core.read.activate() {
                debug!("relay stream activated");
            }
            match mem::replace(&mut core.read, ReadState::Polling) {
                ReadState::Listening(inner) => inner,
                // Either ended naturally or cut short by the sink.
                other => {
                    core.read = other;
                    return Poll::Ready(None);
                }
            }
        };

        // Polled without the lock: the inner stream may use this channel's sink.
        let polled = inner.as_mut().poll_next(cx);

        let mut guard = self.shared.lock();
        let core = &mut *guard;
        if !matches!(core.read, ReadState::Polling) {
            // The sink was closed while polling; whatever was polled is dropped.
            drop(guard);
            drop(inner);
            return Poll::Ready(None);
        }

        match polled {
            Poll::Ready(Some(event)) => {
                trace!(is_error = event.is_err(), "relaying event");
                core.read = ReadState::Listening(inner);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                debug!("inner stream ended; disconnecting sink");
                core.read = ReadState::Done;
                core.read_waker = None;
                let wakeups = core.on_stream_disconnected();

                #[cfg(debug_assertions)]
                debug_assert_sink_released!(core.write);

                drop(guard);
                drop(inner);
                wakeups.wake();
                Poll::Ready(None)
            }
            Poll::Pending => {
                core.read = ReadState::Listening(inner);
                core.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E, K> FusedStream for ChannelStream<T, E, K> {
    fn is_terminated(&self) -> bool {
        self.is_disconnected()
    }
}

impl<T, E, K> fmt::Debug for ChannelStream<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStream")
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}
