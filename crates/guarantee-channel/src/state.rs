//! Shared state between the relay stream and the guarded sink.
//!
//! Both halves of a channel hold a [`Shared`] handle to one [`Core`]. Every
//! transition happens while holding its lock, so a disconnect on one side is
//! fully applied before the other side can observe anything. Wakers collected
//! during a transition are only woken after the lock is released, and no
//! caller-supplied stream is polled or dropped while it is held.

use crate::config::ChannelConfig;
use futures_core::stream::BoxStream;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

/// Read-side lifecycle.
pub(crate) enum ReadState<T, E> {
    /// Nobody has polled the relay yet; the inner stream is untouched.
    Dormant(BoxStream<'static, Result<T, E>>),
    /// The relay is forwarding from the inner stream.
    Listening(BoxStream<'static, Result<T, E>>),
    /// The relay has taken the inner stream out to poll it without the lock.
    Polling,
    /// The inner stream reached its end.
    Done,
    /// The sink was closed; the inner stream has been dropped.
    Disconnected,
}

impl<T, E> ReadState<T, E> {
    /// Moves `Dormant` to `Listening`. Returns `true` if this was the first listen.
    pub(crate) fn activate(&mut self) -> bool {
        match mem::replace(self, ReadState::Done) {
            ReadState::Dormant(inner) => {
                *self = ReadState::Listening(inner);
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }

    #[inline]
    pub(crate) fn is_terminated(&self) -> bool {
        matches!(self, ReadState::Done | ReadState::Disconnected)
    }
}

/// Whether the read side is still alive, from the sink's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Connected,
    Disconnected,
}

/// Slot held by an `add_stream` operation in flight.
///
/// The source stream itself is owned by the [`AddStream`](crate::AddStream)
/// future; the slot only lets a disconnect reach it.
#[derive(Default)]
pub(crate) struct PendingAdd {
    pub(crate) waker: Option<Waker>,
}

/// Write-side lifecycle.
///
/// An add-stream operation can only exist while the sink is open and the
/// read side connected: disconnecting cancels it, and closing is refused
/// while it runs.
pub(crate) enum WriteState {
    Open(Link),
    AddingStream(PendingAdd),
    Closed(Link),
}

impl WriteState {
    /// Checks that a write, add-stream or close may proceed.
    ///
    /// Returns the link state the caller should act on.
    pub(crate) fn guard(&self) -> Result<Link, crate::InvalidState> {
        match self {
            WriteState::Open(link) => Ok(*link),
            WriteState::AddingStream(_) => Err(crate::InvalidState::AddStreamPending),
            WriteState::Closed(_) => Err(crate::InvalidState::Closed),
        }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        matches!(self, WriteState::Closed(_))
    }

    #[inline]
    pub(crate) fn is_disconnected(&self) -> bool {
        matches!(
            self,
            WriteState::Open(Link::Disconnected) | WriteState::Closed(Link::Disconnected)
        )
    }
}

/// Work deferred until the core lock has been released: wakers to notify
/// and an inner stream to drop.
#[must_use]
pub(crate) struct Wakeups<T, E> {
    wakers: Vec<Waker>,
    released: Option<BoxStream<'static, Result<T, E>>>,
}

impl<T, E> Default for Wakeups<T, E> {
    fn default() -> Self {
        Self {
            wakers: Vec::new(),
            released: None,
        }
    }
}

impl<T, E> Wakeups<T, E> {
    fn push(&mut self, waker: Option<Waker>) {
        if let Some(waker) = waker {
            self.wakers.push(waker);
        }
    }

    fn merge(&mut self, other: Wakeups<T, E>) {
        self.wakers.extend(other.wakers);
        if other.released.is_some() {
            self.released = other.released;
        }
    }

    pub(crate) fn wake(self) {
        drop(self.released);
        for waker in self.wakers {
            waker.wake();
        }
    }
}

pub(crate) struct Core<T, E, K> {
    pub(crate) read: ReadState<T, E>,
    /// Consumer of the relay stream, parked on the inner stream.
    pub(crate) read_waker: Option<Waker>,
    pub(crate) write: WriteState,
    /// Writer parked on the inner sink's readiness.
    pub(crate) write_waker: Option<Waker>,
    pub(crate) inner: Pin<Box<K>>,
    /// Set once the inner sink must be closed by the next `poll_close`.
    pub(crate) close_inner: bool,
    pub(crate) config: ChannelConfig,
}

impl<T, E, K> Core<T, E, K> {
    pub(crate) fn new(
        inner_stream: BoxStream<'static, Result<T, E>>,
        inner_sink: K,
        config: ChannelConfig,
    ) -> Self {
        Self {
            read: ReadState::Dormant(inner_stream),
            read_waker: None,
            write: WriteState::Open(Link::Connected),
            write_waker: None,
            inner: Box::pin(inner_sink),
            close_inner: false,
            config,
        }
    }

    /// The inner stream has ended: writes become no-ops and any pending
    /// add-stream is cancelled.
    pub(crate) fn on_stream_disconnected(&mut self) -> Wakeups<T, E> {
        let mut wakeups = Wakeups::default();
        let next = match mem::replace(&mut self.write, WriteState::Open(Link::Disconnected)) {
            WriteState::Open(_) => WriteState::Open(Link::Disconnected),
            WriteState::AddingStream(pending) => {
                tracing::debug!("read side ended; cancelling pending add_stream");
                wakeups.push(pending.waker);
                WriteState::Open(Link::Disconnected)
            }
            WriteState::Closed(_) => WriteState::Closed(Link::Disconnected),
        };
        self.write = next;
        wakeups.push(self.write_waker.take());
        wakeups
    }

    /// The sink was closed: end the relay and hand the inner stream back to
    /// be dropped once the lock is released.
    ///
    /// If the relay is polling the inner stream right now, it sees the
    /// disconnect when it relocks and drops the stream itself.
    pub(crate) fn on_sink_disconnected(&mut self) -> Wakeups<T, E> {
        let mut wakeups = Wakeups::default();
        if !self.read.is_terminated() {
            tracing::debug!("sink closed; cancelling inner stream");
            match mem::replace(&mut self.read, ReadState::Disconnected) {
                ReadState::Dormant(inner) | ReadState::Listening(inner) => {
                    wakeups.released = Some(inner);
                }
                ReadState::Polling | ReadState::Done | ReadState::Disconnected => {}
            }
        }
        wakeups.push(self.read_waker.take());
        wakeups
    }

    /// Tears the channel down after an error event was written to a sink
    /// that does not accept them.
    pub(crate) fn reject_sink_error(&mut self) -> Wakeups<T, E> {
        tracing::debug!("error event written to sink; tearing channel down");
        let mut wakeups = self.on_stream_disconnected();
        wakeups.merge(self.on_sink_disconnected());
        self.close_inner = true;
        wakeups
    }
}

/// Handle to the core shared by the relay stream, the sink and any
/// in-flight add-stream future.
pub(crate) struct Shared<T, E, K>(Arc<Mutex<Core<T, E, K>>>);

impl<T, E, K> Shared<T, E, K> {
    pub(crate) fn new(core: Core<T, E, K>) -> Self {
        Self(Arc::new(Mutex::new(core)))
    }

    /// Locks the core.
    ///
    /// Transitions never leave the core half-updated, so a poisoned lock is
    /// still safe to use.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Core<T, E, K>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E, K> Clone for Shared<T, E, K> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
