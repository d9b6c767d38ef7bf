//! Error types for guarded channel operations.

use thiserror::Error;

/// A usage violation on the guarded sink.
///
/// These are programmer errors: they are returned synchronously from the
/// offending call and never through an [`AddStream`](crate::AddStream) result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidState {
    /// The sink was closed by its user.
    #[error("cannot use the sink after it has been closed")]
    Closed,

    /// An `add_stream` operation is still forwarding into the sink.
    #[error("cannot use the sink while a stream is being added")]
    AddStreamPending,
}

/// Errors that can occur on the write side of a [`GuaranteeChannel`](crate::GuaranteeChannel).
///
/// `E` is the payload error type carried by the channel, `SE` is the error
/// type of the wrapped sink.
#[derive(Debug, Error)]
pub enum GuaranteeError<E, SE> {
    /// The caller broke the sink's usage discipline.
    #[error(transparent)]
    InvalidState(#[from] InvalidState),

    /// The wrapped sink itself failed.
    #[error("inner sink failed: {0}")]
    Inner(#[source] SE),

    /// An error event was written while the channel disallows sink errors.
    /// The channel has been torn down in both directions.
    #[error("error events are not allowed on this sink")]
    SinkErrorRejected(E),
}

impl<E, SE> GuaranteeError<E, SE> {
    /// Returns `true` if this is a usage violation rather than a transport failure.
    #[inline]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Returns `true` if the sink can no longer forward anything after this error.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidState(InvalidState::Closed) | Self::SinkErrorRejected(_)
        )
    }
}

impl<E, SE> PartialEq<InvalidState> for GuaranteeError<E, SE> {
    fn eq(&self, other: &InvalidState) -> bool {
        matches!(self, Self::InvalidState(s) if s == other)
    }
}
