//! Future driving an `add_stream` operation.

use crate::error::GuaranteeError;
use crate::state::{Link, Shared, WriteState};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::stream::BoxStream;
use futures_sink::Sink;
use futures_util::stream::{Fuse, StreamExt};
use tracing::{debug, trace};

/// How an `add_stream` operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStreamOutcome {
    /// The source stream ended and all its events were forwarded.
    Completed,
    /// The read side ended first; the source stream was dropped.
    Cancelled,
    /// The read side had already ended when the operation was requested.
    Discarded,
}

/// Future returned by [`GuaranteeSink::add_stream`](crate::GuaranteeSink::add_stream).
///
/// Must be polled for the source's events to reach the inner sink. When the
/// read side ends, this future is woken and resolves with
/// [`AddStreamOutcome::Cancelled`] on its next poll, dropping the source
/// without forwarding anything more from it.
///
/// Each poll forwards at most
/// [`ChannelConfig::forward_budget`](crate::ChannelConfig::forward_budget)
/// events before yielding, so an endless ready source cannot starve the
/// read side.
#[must_use = "the source stream is only forwarded while this future is polled"]
pub struct AddStream<T, E, K> {
    /// `None` once resolved, or from the start if discarded.
    op: Option<Operation<T, E, K>>,
}

struct Operation<T, E, K> {
    shared: Shared<T, E, K>,
    source: Fuse<BoxStream<'static, Result<T, E>>>,
    /// Event pulled from `source` waiting for the inner sink to become ready.
    buffered: Option<Result<T, E>>,
}

impl<T, E, K> AddStream<T, E, K> {
    pub(crate) fn new(shared: Shared<T, E, K>, source: BoxStream<'static, Result<T, E>>) -> Self {
        Self {
            op: Some(Operation {
                shared,
                source: source.fuse(),
                buffered: None,
            }),
        }
    }

    pub(crate) fn discarded() -> Self {
        Self { op: None }
    }
}

// No field is ever pinned.
impl<T, E, K> Unpin for AddStream<T, E, K> {}

type Output<E, SE> = Result<AddStreamOutcome, GuaranteeError<E, SE>>;

impl<T, E, K> Operation<T, E, K>
where
    K: Sink<Result<T, E>>,
{
    fn poll_forward(&mut self, cx: &mut Context<'_>) -> Poll<Output<E, K::Error>> {
        let mut forwarded = 0usize;
        loop {
            {
                let mut guard = self.shared.lock();
                let core = &mut *guard;
                let WriteState::AddingStream(pending) = &mut core.write else {
                    debug!("add_stream cancelled by read-side disconnect");
                    return Poll::Ready(Ok(AddStreamOutcome::Cancelled));
                };
                pending.waker = Some(cx.waker().clone());

                if let Some(event) = self.buffered.take() {
                    match core.inner.as_mut().poll_ready(cx) {
                        Poll::Ready(Ok(())) => {}
                        Poll::Ready(Err(e)) => {
                            core.write = WriteState::Open(Link::Connected);
                            return Poll::Ready(Err(GuaranteeError::Inner(e)));
                        }
                        Poll::Pending => {
                            self.buffered = Some(event);
                            return Poll::Pending;
                        }
                    }
                    if let Err(e) = core.inner.as_mut().start_send(event) {
                        core.write = WriteState::Open(Link::Connected);
                        return Poll::Ready(Err(GuaranteeError::Inner(e)));
                    }

                    forwarded += 1;
                    if forwarded >= core.config.forward_budget.max(1) {
                        if let Poll::Ready(Err(e)) = core.inner.as_mut().poll_flush(cx) {
                            core.write = WriteState::Open(Link::Connected);
                            return Poll::Ready(Err(GuaranteeError::Inner(e)));
                        }
                        // Let the read side run; a disconnect is seen on the next poll.
                        trace!(forwarded, "add_stream budget spent; yielding");
                        cx.waker().wake_by_ref();
                        return Poll::Pending;
                    }
                }
            }

            // Polled without the lock: the source may be this channel's own relay.
            let polled = self.source.poll_next_unpin(cx);

            let mut guard = self.shared.lock();
            let core = &mut *guard;
            if !matches!(core.write, WriteState::AddingStream(_)) {
                debug!("add_stream cancelled by read-side disconnect");
                return Poll::Ready(Ok(AddStreamOutcome::Cancelled));
            }

            match polled {
                Poll::Ready(Some(Err(error))) if !core.config.allow_sink_errors => {
                    core.write = WriteState::Open(Link::Connected);
                    let wakeups = core.reject_sink_error();
                    drop(guard);
                    wakeups.wake();
                    return Poll::Ready(Err(GuaranteeError::SinkErrorRejected(error)));
                }
                Poll::Ready(Some(event)) => {
                    trace!(is_error = event.is_err(), "forwarding added event");
                    self.buffered = Some(event);
                }
                Poll::Ready(None) => {
                    return match core.inner.as_mut().poll_flush(cx) {
                        Poll::Ready(Ok(())) => {
                            debug!("add_stream completed");
                            core.write = WriteState::Open(Link::Connected);
                            Poll::Ready(Ok(AddStreamOutcome::Completed))
                        }
                        Poll::Ready(Err(e)) => {
                            core.write = WriteState::Open(Link::Connected);
                            Poll::Ready(Err(GuaranteeError::Inner(e)))
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
                Poll::Pending => {
                    return match core.inner.as_mut().poll_flush(cx) {
                        Poll::Ready(Err(e)) => {
                            core.write = WriteState::Open(Link::Connected);
                            Poll::Ready(Err(GuaranteeError::Inner(e)))
                        }
                        _ => Poll::Pending,
                    };
                }
            }
        }
    }
}

impl<T, E, K> Future for AddStream<T, E, K>
where
    K: Sink<Result<T, E>>,
{
    type Output = Output<E, K::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(op) = self.op.as_mut() else {
            return Poll::Ready(Ok(AddStreamOutcome::Discarded));
        };
        let result = op.poll_forward(cx);
        if result.is_ready() {
            // Drops the source stream; the slot has already been released.
            self.op = None;
        }
        result
    }
}

impl<T, E, K> Drop for AddStream<T, E, K> {
    fn drop(&mut self) {
        let Some(op) = self.op.take() else {
            return;
        };
        let mut core = op.shared.lock();
        if matches!(core.write, WriteState::AddingStream(_)) {
            debug!("add_stream dropped before completion; releasing sink");
            core.write = WriteState::Open(Link::Connected);
        }
    }
}

impl<T, E, K> fmt::Debug for AddStream<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddStream")
            .field("resolved", &self.op.is_none())
            .finish()
    }
}
