//! Guarded sink implementing `futures::Sink`.

use crate::add_stream::AddStream;
use crate::error::{GuaranteeError, InvalidState};
#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_add_slot_free, debug_assert_relay_released};
use crate::state::{Link, PendingAdd, Shared, Wakeups, WriteState};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_sink::Sink;
use futures_util::SinkExt;
use tracing::{debug, trace};

/// The writable half of a [`GuaranteeChannel`](crate::GuaranteeChannel).
///
/// Forwards events to the wrapped sink while enforcing its usage rules:
///
/// | Sink state | write / `add_stream` | close |
/// |---|---|---|
/// | open, read side alive | forwarded | closes inner sink, ends relay |
/// | open, read side ended | silently discarded | no-op |
/// | `add_stream` pending | [`InvalidState::AddStreamPending`] | [`InvalidState::AddStreamPending`] |
/// | closed | [`InvalidState::Closed`] | no-op |
///
/// Writing after the read side has ended is not an error: the caller cannot
/// reliably avoid racing the other end, so such writes are dropped.
pub struct GuaranteeSink<T, E, K> {
    shared: Shared<T, E, K>,
}

impl<T, E, K> GuaranteeSink<T, E, K> {
    pub(crate) fn new(shared: Shared<T, E, K>) -> Self {
        Self { shared }
    }

    /// Returns `true` once the sink has been closed by its user.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().write.is_closed()
    }

    /// Returns `true` once the read side has ended and writes are discarded.
    pub fn is_disconnected(&self) -> bool {
        self.shared.lock().write.is_disconnected()
    }

    /// Returns `true` while an [`AddStream`] is forwarding into this sink.
    pub fn is_adding_stream(&self) -> bool {
        matches!(self.shared.lock().write, WriteState::AddingStream(_))
    }
}

impl<T, E, K> GuaranteeSink<T, E, K>
where
    T: Send + 'static,
    E: Send + 'static,
    K: Sink<Result<T, E>>,
{
    /// Writes a data event, waiting for the inner sink to accept it.
    pub async fn add(&mut self, item: T) -> Result<(), GuaranteeError<E, K::Error>> {
        self.send(Ok(item)).await
    }

    /// Writes an error event, waiting for the inner sink to accept it.
    pub async fn add_error(&mut self, error: E) -> Result<(), GuaranteeError<E, K::Error>> {
        self.send(Err(error)).await
    }

    /// Forwards every event of `source` into the inner sink.
    ///
    /// Usage errors are returned immediately. Otherwise the returned
    /// [`AddStream`] drives the forwarding and resolves once `source` ends,
    /// or as soon as the read side ends and the operation is cancelled. No
    /// other write or close is accepted until it resolves. Dropping it
    /// early cancels the operation.
    ///
    /// If the read side has already ended, `source` is dropped untouched
    /// and the returned future is already resolved.
    pub fn add_stream<St>(
        &mut self,
        source: St,
    ) -> Result<AddStream<T, E, K>, GuaranteeError<E, K::Error>>
    where
        St: Stream<Item = Result<T, E>> + Send + 'static,
    {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        if core.write.guard()? == Link::Disconnected {
            trace!("read side ended; discarding add_stream");
            return Ok(AddStream::discarded());
        }

        #[cfg(debug_assertions)]
        debug_assert_add_slot_free!(core.write);

        debug!("add_stream started");
        core.write = WriteState::AddingStream(PendingAdd::default());
        drop(guard);
        Ok(AddStream::new(self.shared.clone(), Box::pin(source)))
    }
}

impl<T, E, K> Sink<Result<T, E>> for GuaranteeSink<T, E, K>
where
    K: Sink<Result<T, E>>,
{
    type Error = GuaranteeError<E, K::Error>;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        if core.write.guard()? == Link::Disconnected {
            return Poll::Ready(Ok(()));
        }

        match core.inner.as_mut().poll_ready(cx) {
            Poll::Ready(result) => Poll::Ready(result.map_err(GuaranteeError::Inner)),
            Poll::Pending => {
                core.write_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn start_send(self: Pin<&mut Self>, event: Result<T, E>) -> Result<(), Self::Error> {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        if core.write.guard()? == Link::Disconnected {
            trace!("read side ended; discarding event");
            return Ok(());
        }

        match event {
            Err(error) if !core.config.allow_sink_errors => {
                let wakeups = core.reject_sink_error();
                drop(guard);
                wakeups.wake();
                Err(GuaranteeError::SinkErrorRejected(error))
            }
            event => {
                trace!(is_error = event.is_err(), "forwarding event");
                core.inner
                    .as_mut()
                    .start_send(event)
                    .map_err(GuaranteeError::Inner)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        match core.write {
            WriteState::Open(Link::Connected) | WriteState::AddingStream(_) => core
                .inner
                .as_mut()
                .poll_flush(cx)
                .map_err(GuaranteeError::Inner),
            // Nothing more reaches the inner sink in any other state.
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        let mut wakeups = Wakeups::default();

        match core.write {
            WriteState::AddingStream(_) => {
                return Poll::Ready(Err(InvalidState::AddStreamPending.into()));
            }
            WriteState::Open(link) => {
                core.write = WriteState::Closed(link);
                if link == Link::Connected {
                    debug!("sink closed; disconnecting read side");
                    wakeups = core.on_sink_disconnected();
                    core.close_inner = true;

                    #[cfg(debug_assertions)]
                    debug_assert_relay_released!(core.read);
                }
            }
            WriteState::Closed(_) => {}
        }

        let result = if core.close_inner {
            match core.inner.as_mut().poll_close(cx) {
                Poll::Ready(result) => {
                    core.close_inner = false;
                    Poll::Ready(result.map_err(GuaranteeError::Inner))
                }
                Poll::Pending => Poll::Pending,
            }
        } else {
            Poll::Ready(Ok(()))
        };

        drop(guard);
        wakeups.wake();
        result
    }
}

impl<T, E, K> fmt::Debug for GuaranteeSink<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("GuaranteeSink")
            .field("closed", &core.write.is_closed())
            .field("disconnected", &core.write.is_disconnected())
            .field(
                "adding_stream",
                &matches!(core.write, WriteState::AddingStream(_)),
            )
            .finish()
    }
}
