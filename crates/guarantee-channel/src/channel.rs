//! Channel construction.

use crate::config::ChannelConfig;
use crate::error::GuaranteeError;
use crate::sink::GuaranteeSink;
use crate::state::{Core, Shared};
use crate::stream::ChannelStream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use futures_core::Stream;
use futures_sink::Sink;
use tracing::debug;

/// A duplex channel built from an existing stream/sink pair.
///
/// The pair is assumed to be the two halves of one connection. The channel
/// adds the guarantees the raw pair lacks:
///
/// - the inner stream is polled by at most one consumer, and only once the
///   relay is first polled;
/// - the sink rejects writes after close and while an `add_stream` is pending;
/// - when the inner stream ends, the sink silently drops further writes;
/// - when the sink is closed, the relay ends and the inner stream is dropped.
///
/// Use [`split`](Self::split) to drive the halves from different tasks.
///
/// # Example
///
/// ```ignore
/// use futures::{SinkExt, StreamExt};
/// use guarantee_channel::GuaranteeChannel;
///
/// let (inner_tx, inner_rx) = futures::channel::mpsc::unbounded::<Result<u32, String>>();
/// let incoming = futures::stream::iter(vec![Ok(1), Ok(2)]);
/// let (mut stream, mut sink) = GuaranteeChannel::new(incoming, inner_tx).split();
///
/// sink.add(10).await?;
/// while let Some(event) = stream.next().await {
///     println!("received {:?}", event);
/// }
/// // The read side ended, so this write is dropped.
/// sink.add(11).await?;
/// ```
pub struct GuaranteeChannel<T, E, K> {
    stream: ChannelStream<T, E, K>,
    sink: GuaranteeSink<T, E, K>,
}

impl<T, E, K> GuaranteeChannel<T, E, K>
where
    T: Send + 'static,
    E: Send + 'static,
    K: Sink<Result<T, E>>,
{
    /// Wraps `inner_stream` and `inner_sink` with the default configuration.
    ///
    /// The inner stream must have a single consumer; broadcast sources go
    /// through [`from_broadcast`](GuaranteeChannel::from_broadcast).
    pub fn new<S>(inner_stream: S, inner_sink: K) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self::with_config(inner_stream, inner_sink, ChannelConfig::default())
    }

    /// Wraps `inner_stream` and `inner_sink` with a custom configuration.
    pub fn with_config<S>(inner_stream: S, inner_sink: K, config: ChannelConfig) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        debug!(
            allow_sink_errors = config.allow_sink_errors,
            "creating guarantee channel"
        );
        let shared = Shared::new(Core::new(Box::pin(inner_stream), inner_sink, config));
        Self {
            stream: ChannelStream::new(shared.clone()),
            sink: GuaranteeSink::new(shared),
        }
    }
}

impl<T, K> GuaranteeChannel<T, BroadcastStreamRecvError, K>
where
    T: Clone + Send + 'static,
    K: Sink<Result<T, BroadcastStreamRecvError>>,
{
    /// Wraps a broadcast subscription, routing it through a single-consumer
    /// adapter first.
    ///
    /// Messages missed because the receiver lagged behind show up as
    /// [`BroadcastStreamRecvError::Lagged`] error events.
    pub fn from_broadcast(receiver: broadcast::Receiver<T>, inner_sink: K) -> Self {
        Self::from_broadcast_with_config(receiver, inner_sink, ChannelConfig::default())
    }

    /// Like [`from_broadcast`](Self::from_broadcast) with a custom configuration.
    pub fn from_broadcast_with_config(
        receiver: broadcast::Receiver<T>,
        inner_sink: K,
        config: ChannelConfig,
    ) -> Self {
        Self::with_config(BroadcastStream::new(receiver), inner_sink, config)
    }
}

impl<T, E, K> GuaranteeChannel<T, E, K> {
    /// The readable half.
    pub fn stream(&mut self) -> &mut ChannelStream<T, E, K> {
        &mut self.stream
    }

    /// The writable half.
    pub fn sink(&mut self) -> &mut GuaranteeSink<T, E, K> {
        &mut self.sink
    }

    /// Separates the channel into its two halves.
    pub fn split(self) -> (ChannelStream<T, E, K>, GuaranteeSink<T, E, K>) {
        (self.stream, self.sink)
    }
}

impl<T, E, K> Stream for GuaranteeChannel<T, E, K> {
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<T, E, K> Sink<Result<T, E>> for GuaranteeChannel<T, E, K>
where
    K: Sink<Result<T, E>>,
{
    type Error = GuaranteeError<E, K::Error>;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.sink).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, event: Result<T, E>) -> Result<(), Self::Error> {
        Pin::new(&mut self.sink).start_send(event)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.sink).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.sink).poll_close(cx)
    }
}
