//! Integration tests for guarantee-channel.

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use futures::Sink;
use guarantee_channel::{
    AddStreamOutcome, BroadcastStreamRecvError, ChannelConfig, GuaranteeChannel, GuaranteeError,
    GuaranteeSink, InvalidState,
};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

type Event = Result<u32, String>;
type TestChannel = GuaranteeChannel<u32, String, UnboundedSender<Event>>;

/// Channel over a controllable inner stream, plus both far ends.
fn open_channel() -> (TestChannel, UnboundedSender<Event>, UnboundedReceiver<Event>) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded();
    let channel = GuaranteeChannel::new(incoming_rx, outgoing_tx);
    (channel, incoming_tx, outgoing_rx)
}

/// Inner stream that records whether it was ever polled.
fn watched_stream(polled: Arc<AtomicBool>) -> impl futures::Stream<Item = Event> + Send + 'static {
    stream::poll_fn(move |_| {
        polled.store(true, Ordering::SeqCst);
        Poll::Ready(Some(Ok(7)))
    })
}

/// Collects whatever the inner sink has received so far.
fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut received = Vec::new();
    while let Ok(Some(event)) = rx.try_next() {
        received.push(event);
    }
    received
}

/// Inner sink that accepts every event but fails to close.
struct FailingCloseSink;

impl Sink<Event> for FailingCloseSink {
    type Error = &'static str;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, _event: Event) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Err("connection reset"))
    }
}

fn assert_invalid<T: std::fmt::Debug, SE: std::fmt::Debug>(
    result: Result<T, GuaranteeError<String, SE>>,
    expected: InvalidState,
) {
    match result {
        Err(GuaranteeError::InvalidState(state)) => assert_eq!(state, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

#[tokio::test]
async fn test_relay_then_discard_after_stream_end() {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let incoming = stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
    let (mut stream, mut sink) = GuaranteeChannel::new(incoming, outgoing_tx).split();

    let mut received = Vec::new();
    while let Some(event) = stream.next().await {
        received.push(event);
    }
    assert_eq!(received, vec![Ok(1), Ok(2), Ok(3)]);

    // Already disconnected by the time the consumer saw the end.
    assert!(sink.is_disconnected());
    assert!(!sink.is_closed());

    sink.add(4).await.expect("write after disconnect is a no-op");
    sink.add_error("late".to_owned())
        .await
        .expect("error after disconnect is a no-op");
    assert!(drain(&mut outgoing_rx).is_empty());
}

#[tokio::test]
async fn test_close_before_listen_ends_relay_without_touching_inner() {
    let polled = Arc::new(AtomicBool::new(false));
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) =
        GuaranteeChannel::new(watched_stream(Arc::clone(&polled)), outgoing_tx).split();

    sink.close().await.expect("close failed");
    assert!(stream.is_disconnected());

    assert_eq!(stream.next().await, None);
    assert!(!polled.load(Ordering::SeqCst));

    // Inner sink was closed too.
    assert_eq!(outgoing_rx.next().await, None);
}

#[tokio::test]
async fn test_stream_end_cancels_pending_add_stream() {
    let (channel, incoming_tx, _outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    let mut add = sink
        .add_stream(stream::pending::<Event>())
        .expect("add_stream failed");
    assert!(futures::poll!(&mut add).is_pending());
    assert!(sink.is_adding_stream());

    drop(incoming_tx);
    assert_eq!(stream.next().await, None);

    let outcome = timeout(Duration::from_millis(100), add)
        .await
        .expect("add_stream did not resolve after disconnect")
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Cancelled);
    assert!(!sink.is_adding_stream());
}

#[tokio::test]
async fn test_stream_end_wakes_add_stream_on_another_task() {
    let (channel, incoming_tx, _outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    let add = sink
        .add_stream(stream::pending::<Event>())
        .expect("add_stream failed");
    let handle = tokio::spawn(add);
    tokio::task::yield_now().await;

    drop(incoming_tx);
    assert_eq!(stream.next().await, None);

    let outcome = timeout(Duration::from_millis(100), handle)
        .await
        .expect("add_stream task was not woken")
        .expect("task panicked")
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Cancelled);
}

#[tokio::test]
async fn test_stream_end_cancels_add_stream_over_endless_source() {
    // Single-threaded runtime: the reader only runs if forwarding yields.
    let (incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) =
        GuaranteeChannel::new(incoming_rx, futures::sink::drain()).split();

    let reader = tokio::spawn(async move {
        drop(incoming_tx);
        stream.next().await
    });

    let add = sink
        .add_stream(stream::repeat(Ok(1)))
        .expect("add_stream failed");
    let outcome = timeout(Duration::from_secs(1), add)
        .await
        .expect("add_stream did not resolve after disconnect")
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Cancelled);

    assert_eq!(reader.await.expect("task panicked"), None);
    assert!(sink.is_disconnected());
    assert!(!sink.is_adding_stream());
}

#[tokio::test]
async fn test_add_stream_yields_without_losing_events() {
    let (_incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let config = ChannelConfig::default().with_forward_budget(7);
    let (_stream, mut sink) =
        GuaranteeChannel::with_config(incoming_rx, outgoing_tx, config).split();

    let outcome = sink
        .add_stream(stream::iter(0..100u32).map(Ok))
        .expect("add_stream failed")
        .await
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Completed);

    let expected: Vec<Event> = (0..100u32).map(Ok).collect();
    assert_eq!(drain(&mut outgoing_rx), expected);
}

#[tokio::test]
async fn test_close_returns_inner_close_error() {
    let (_incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) = GuaranteeChannel::new(incoming_rx, FailingCloseSink).split();

    sink.add(1).await.expect("write failed");
    match sink.close().await {
        Err(GuaranteeError::Inner(error)) => assert_eq!(error, "connection reset"),
        other => panic!("expected inner close error, got {other:?}"),
    }

    // The sink is closed and the relay ended regardless.
    assert!(sink.is_closed());
    assert_eq!(stream.next().await, None);
    assert_invalid(sink.add(2).await, InvalidState::Closed);

    // The failed inner close is not retried.
    sink.close().await.expect("second close failed");
}

#[tokio::test]
async fn test_inner_stream_may_use_its_own_sink() {
    type Slot = Arc<Mutex<Option<GuaranteeSink<u32, String, UnboundedSender<Event>>>>>;

    let slot: Slot = Arc::default();
    let inner = stream::poll_fn({
        let slot = Arc::clone(&slot);
        move |_| {
            let sink = slot.lock().expect("slot poisoned");
            let closed = sink.as_ref().is_some_and(GuaranteeSink::is_closed);
            Poll::Ready(Some(Ok(u32::from(closed))))
        }
    });
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, sink) = GuaranteeChannel::new(inner, outgoing_tx).split();
    *slot.lock().expect("slot poisoned") = Some(sink);

    let next = timeout(Duration::from_millis(100), stream.next())
        .await
        .expect("relay deadlocked on its own sink");
    assert_eq!(next, Some(Ok(0)));

    // Breaks the cycle between the sink and the inner stream.
    let sink = slot.lock().expect("slot poisoned").take();
    drop(sink);
}

#[tokio::test]
async fn test_writes_then_close_reach_inner_in_order() {
    let (channel, _incoming_tx, mut outgoing_rx) = open_channel();
    let (_stream, mut sink) = channel.split();

    sink.add(1).await.expect("write failed");
    sink.add(2).await.expect("write failed");
    sink.close().await.expect("close failed");

    let mut received = Vec::new();
    while let Some(event) = outgoing_rx.next().await {
        received.push(event);
    }
    assert_eq!(received, vec![Ok(1), Ok(2)]);
}

#[tokio::test]
async fn test_use_after_close_is_invalid_state() {
    let (channel, _incoming_tx, _outgoing_rx) = open_channel();
    let (_stream, mut sink) = channel.split();

    sink.close().await.expect("close failed");
    assert!(sink.is_closed());

    assert_invalid(sink.add(1).await, InvalidState::Closed);
    assert_invalid(sink.add_error("nope".to_owned()).await, InvalidState::Closed);
    assert_invalid(sink.add_stream(stream::empty::<Event>()), InvalidState::Closed);

    // Closing again is fine.
    sink.close().await.expect("second close failed");
}

#[tokio::test]
async fn test_close_after_stream_end_is_invalid_for_writes() {
    let (channel, incoming_tx, mut outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    drop(incoming_tx);
    assert_eq!(stream.next().await, None);

    sink.close().await.expect("close failed");
    assert!(sink.is_closed());
    assert!(sink.is_disconnected());
    assert_invalid(sink.add(1).await, InvalidState::Closed);

    // The inner sink is not closed when the read side already ended.
    assert!(outgoing_rx.try_next().is_err());
}

#[tokio::test]
async fn test_add_stream_is_exclusive() {
    let (channel, _incoming_tx, mut outgoing_rx) = open_channel();
    let (_stream, mut sink) = channel.split();

    let _add = sink
        .add_stream(stream::pending::<Event>())
        .expect("add_stream failed");

    assert_invalid(
        sink.add_stream(stream::empty::<Event>()),
        InvalidState::AddStreamPending,
    );
    assert_invalid(sink.add(1).await, InvalidState::AddStreamPending);
    assert_invalid(
        sink.add_error("nope".to_owned()).await,
        InvalidState::AddStreamPending,
    );
    assert_invalid(sink.close().await, InvalidState::AddStreamPending);

    assert!(!sink.is_closed());
    // Still open: no close reached the inner sink.
    assert!(outgoing_rx.try_next().is_err());
}

#[tokio::test]
async fn test_add_stream_forwards_and_releases_sink() {
    let (channel, _incoming_tx, mut outgoing_rx) = open_channel();
    let (_stream, mut sink) = channel.split();

    let source = stream::iter(vec![Ok(5), Err("bad".to_owned()), Ok(6)]);
    let outcome = sink
        .add_stream(source)
        .expect("add_stream failed")
        .await
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Completed);

    sink.add(7).await.expect("write after add_stream failed");
    assert_eq!(
        drain(&mut outgoing_rx),
        vec![Ok(5), Err("bad".to_owned()), Ok(6), Ok(7)]
    );
}

#[tokio::test]
async fn test_add_stream_after_disconnect_is_discarded() {
    let polled = Arc::new(AtomicBool::new(false));
    let (channel, incoming_tx, mut outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    drop(incoming_tx);
    assert_eq!(stream.next().await, None);

    let outcome = sink
        .add_stream(watched_stream(Arc::clone(&polled)))
        .expect("add_stream failed")
        .await
        .expect("add_stream failed");
    assert_eq!(outcome, AddStreamOutcome::Discarded);
    assert!(!polled.load(Ordering::SeqCst));
    assert!(drain(&mut outgoing_rx).is_empty());
}

#[tokio::test]
async fn test_dropping_add_stream_releases_sink() {
    let (channel, _incoming_tx, mut outgoing_rx) = open_channel();
    let (_stream, mut sink) = channel.split();

    let add = sink
        .add_stream(stream::pending::<Event>())
        .expect("add_stream failed");
    drop(add);

    assert!(!sink.is_adding_stream());
    sink.add(1).await.expect("write failed");
    assert_eq!(drain(&mut outgoing_rx), vec![Ok(1)]);
}

#[tokio::test]
async fn test_error_events_pass_through_both_ways() {
    let (channel, incoming_tx, mut outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    incoming_tx
        .unbounded_send(Err("upstream".to_owned()))
        .expect("send failed");
    incoming_tx.unbounded_send(Ok(1)).expect("send failed");
    assert_eq!(stream.next().await, Some(Err("upstream".to_owned())));
    assert_eq!(stream.next().await, Some(Ok(1)));

    sink.add_error("downstream".to_owned())
        .await
        .expect("add_error failed");
    assert_eq!(drain(&mut outgoing_rx), vec![Err("downstream".to_owned())]);
}

#[tokio::test]
async fn test_close_cancels_live_inner_stream() {
    let (channel, incoming_tx, _outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    incoming_tx.unbounded_send(Ok(1)).expect("send failed");
    assert_eq!(stream.next().await, Some(Ok(1)));

    sink.close().await.expect("close failed");

    // The inner stream was dropped, so its producer sees a closed channel.
    assert!(incoming_tx.is_closed());
    assert!(incoming_tx.unbounded_send(Ok(2)).is_err());
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn test_close_wakes_parked_consumer() {
    let (channel, _incoming_tx, _outgoing_rx) = open_channel();
    let (mut stream, mut sink) = channel.split();

    let consumer = tokio::spawn(async move { stream.next().await });
    tokio::task::yield_now().await;

    sink.close().await.expect("close failed");

    let next = timeout(Duration::from_millis(100), consumer)
        .await
        .expect("consumer was not woken")
        .expect("task panicked");
    assert_eq!(next, None);
}

#[tokio::test]
async fn test_inner_stream_is_untouched_until_first_poll() {
    let polled = Arc::new(AtomicBool::new(false));
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, _sink) =
        GuaranteeChannel::new(watched_stream(Arc::clone(&polled)), outgoing_tx).split();

    tokio::task::yield_now().await;
    assert!(!polled.load(Ordering::SeqCst));

    assert_eq!(stream.next().await, Some(Ok(7)));
    assert!(polled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_strict_config_rejects_sink_errors() {
    let (incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let channel =
        GuaranteeChannel::with_config(incoming_rx, outgoing_tx, ChannelConfig::strict());
    let (mut stream, mut sink) = channel.split();

    sink.add(1).await.expect("write failed");
    match sink.add_error("fatal".to_owned()).await {
        Err(GuaranteeError::SinkErrorRejected(error)) => assert_eq!(error, "fatal"),
        other => panic!("expected rejection, got {other:?}"),
    }

    // Both directions are torn down.
    assert!(sink.is_disconnected());
    assert!(incoming_tx.is_closed());
    assert_eq!(stream.next().await, None);

    // Later writes are dropped; close still closes the inner sink.
    sink.add(2).await.expect("write after teardown is a no-op");
    sink.close().await.expect("close failed");

    let mut received = Vec::new();
    while let Some(event) = outgoing_rx.next().await {
        received.push(event);
    }
    assert_eq!(received, vec![Ok(1)]);
}

#[tokio::test]
async fn test_strict_config_rejects_added_stream_errors() {
    let (_incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) =
        GuaranteeChannel::with_config(incoming_rx, outgoing_tx, ChannelConfig::strict()).split();

    let source = stream::iter(vec![Ok(1), Err("fatal".to_owned()), Ok(2)]);
    let result = sink.add_stream(source).expect("add_stream failed").await;
    assert!(matches!(result, Err(GuaranteeError::SinkErrorRejected(_))));

    assert!(sink.is_disconnected());
    assert!(!sink.is_adding_stream());
    assert_eq!(stream.next().await, None);
    assert_eq!(drain(&mut outgoing_rx), vec![Ok(1)]);
}

#[tokio::test]
async fn test_broadcast_source_goes_through_adapter() {
    let (tx, rx) = broadcast::channel(16);
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Result<u32, BroadcastStreamRecvError>>();
    let (mut stream, sink) = GuaranteeChannel::from_broadcast(rx, outgoing_tx).split();

    tx.send(1u32).expect("broadcast send failed");
    tx.send(2u32).expect("broadcast send failed");
    drop(tx);

    let received: Vec<_> = (&mut stream).collect().await;
    assert_eq!(received, vec![Ok(1), Ok(2)]);
    assert!(sink.is_disconnected());
}

#[tokio::test]
async fn test_broadcast_lag_is_an_error_event() {
    let (tx, rx) = broadcast::channel(2);
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Result<u32, BroadcastStreamRecvError>>();
    let (mut stream, _sink) = GuaranteeChannel::from_broadcast(rx, outgoing_tx).split();

    for i in 1..=4u32 {
        tx.send(i).expect("broadcast send failed");
    }
    drop(tx);

    assert!(matches!(
        stream.next().await,
        Some(Err(BroadcastStreamRecvError::Lagged(2)))
    ));
    assert_eq!(stream.next().await, Some(Ok(3)));
    assert_eq!(stream.next().await, Some(Ok(4)));
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn test_channel_is_itself_a_stream_and_sink() {
    let (mut channel, incoming_tx, mut outgoing_rx) = open_channel();

    channel.send(Ok(9)).await.expect("send failed");
    incoming_tx.unbounded_send(Ok(8)).expect("send failed");
    assert_eq!(channel.next().await, Some(Ok(8)));
    assert!(!channel.sink().is_closed());

    channel.close().await.expect("close failed");
    assert!(channel.stream().is_disconnected());
    assert_eq!(drain(&mut outgoing_rx), vec![Ok(9)]);
}
