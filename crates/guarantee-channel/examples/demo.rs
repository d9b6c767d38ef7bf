//! Demonstration of guarantee-channel features.
//!
//! Run with: `RUST_LOG=guarantee_channel=debug cargo run -p guarantee-channel --example demo`

use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use guarantee_channel::{
    BroadcastStreamRecvError, ChannelConfig, GuaranteeChannel, GuaranteeError, InvalidState,
};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

type Event = Result<u64, String>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== guarantee-channel Demo ===\n");

    demo_relay_and_disconnect().await?;
    demo_close_silences_reader().await?;
    demo_misuse_guards().await?;
    demo_add_stream_cancellation().await?;
    demo_broadcast_source().await?;
    demo_strict_errors().await?;

    println!("\n=== All demos completed successfully! ===");
    Ok(())
}

/// Demo 1: Events are relayed, then writes are dropped once the reader ends
async fn demo_relay_and_disconnect() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 1: Relay and Disconnect ---");

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded::<Event>();
    let incoming = stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
    let (mut stream, mut sink) = GuaranteeChannel::new(incoming, outgoing_tx).split();

    sink.add(100).await?;
    while let Some(event) = stream.next().await {
        println!("  Received: {:?}", event);
    }

    // Reader is done, so this is silently dropped.
    sink.add(101).await?;
    println!("  Sink disconnected: {}", sink.is_disconnected());

    // Dropping both halves releases the inner sink.
    drop(stream);
    drop(sink);
    let forwarded: Vec<_> = outgoing_rx.by_ref().collect().await;
    println!("  Inner sink saw: {:?}", forwarded);
    println!("  ✓ Relay complete\n");
    Ok(())
}

/// Demo 2: Closing the sink ends the relay even if the inner stream is live
async fn demo_close_silences_reader() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 2: Close Silences Reader ---");

    let (incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) = GuaranteeChannel::new(incoming_rx, outgoing_tx).split();

    let reader = tokio::spawn(async move {
        let mut count = 0;
        while let Some(event) = stream.next().await {
            println!("  Reader got: {:?}", event);
            count += 1;
        }
        count
    });

    incoming_tx.unbounded_send(Ok(1))?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    sink.close().await?;

    println!("  Reader finished after {} event(s)", reader.await?);
    println!("  Producer sees closed inner stream: {}", incoming_tx.is_closed());
    println!("  ✓ Close propagated\n");
    Ok(())
}

/// Demo 3: Usage errors are reported immediately
async fn demo_misuse_guards() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 3: Misuse Guards ---");

    let (_incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (_stream, mut sink) = GuaranteeChannel::new(incoming_rx, outgoing_tx).split();

    let pending = sink.add_stream(stream::pending::<Event>())?;
    match sink.add(1).await {
        Err(GuaranteeError::InvalidState(InvalidState::AddStreamPending)) => {
            println!("  Write during add_stream rejected");
        }
        other => println!("  Unexpected: {:?}", other),
    }
    drop(pending);

    sink.close().await?;
    match sink.add(2).await {
        Err(err @ GuaranteeError::InvalidState(InvalidState::Closed)) => {
            println!("  Write after close rejected: {}", err);
        }
        other => println!("  Unexpected: {:?}", other),
    }

    println!("  ✓ Guards enforced\n");
    Ok(())
}

/// Demo 4: A pending add_stream resolves as soon as the reader ends
async fn demo_add_stream_cancellation() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 4: add_stream Cancellation ---");

    let (incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) = GuaranteeChannel::new(incoming_rx, outgoing_tx).split();

    // An endless source, one event every millisecond.
    let ticks = stream::unfold(0u64, |n| async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Some((Ok(n), n + 1))
    });
    let forwarding = tokio::spawn(sink.add_stream(ticks)?);

    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(incoming_tx);
    assert!(stream.next().await.is_none());

    let outcome = forwarding.await??;
    println!("  add_stream outcome: {:?}", outcome);
    println!("  ✓ Cancellation observed\n");
    Ok(())
}

/// Demo 5: Broadcast receivers go through a single-consumer adapter
async fn demo_broadcast_source() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 5: Broadcast Source ---");

    let (tx, rx) = broadcast::channel(2);
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Result<u64, BroadcastStreamRecvError>>();
    let mut channel = GuaranteeChannel::from_broadcast(rx, outgoing_tx);

    for i in 0..4u64 {
        tx.send(i)?;
    }
    drop(tx);

    while let Some(event) = channel.next().await {
        println!("  Received: {:?}", event);
    }
    println!("  ✓ Lag surfaced as an error event\n");
    Ok(())
}

/// Demo 6: Strict channels tear down on the first written error
async fn demo_strict_errors() -> Result<(), Box<dyn std::error::Error>> {
    println!("--- Demo 6: Strict Sink Errors ---");

    let (_incoming_tx, incoming_rx) = mpsc::unbounded::<Event>();
    let (outgoing_tx, _outgoing_rx) = mpsc::unbounded::<Event>();
    let (mut stream, mut sink) =
        GuaranteeChannel::with_config(incoming_rx, outgoing_tx, ChannelConfig::strict()).split();

    if let Err(err) = sink.add_error("protocol violation".to_owned()).await {
        println!("  add_error failed: {}", err);
    }
    println!("  Reader ended: {}", stream.next().await.is_none());
    println!("  ✓ Channel torn down\n");
    Ok(())
}
