//! Guaranteed duplex channels over existing Stream/Sink pairs
//!
//! This crate wraps an arbitrary [`Stream`](futures_core::Stream) and [`Sink`](futures_sink::Sink)
//! that form the two halves of one connection, and adds the structural
//! guarantees the raw pair does not give you.
//!
//! # Features
//!
//! - **Single consumer**: the inner stream is polled by one relay stream only,
//!   and not before the relay is first polled
//! - **Misuse guards**: writing after close, or while an `add_stream` is
//!   pending, fails immediately with [`InvalidState`]
//! - **Coordinated shutdown**: the inner stream ending makes the sink drop
//!   further writes; closing the sink ends the relay and drops the inner stream
//! - **Ordering**: a disconnect is fully applied before the other half can
//!   observe it, so a write issued in reaction to end-of-stream is dropped
//!   instead of racing the inner sink
//!
//! Events are `Result<T, E>` in both directions: `Ok` is data, `Err` is an
//! error event that is passed through untouched.
//!
//! # Example
//!
//! ```ignore
//! use futures::{SinkExt, StreamExt};
//! use guarantee_channel::GuaranteeChannel;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (inner_tx, mut inner_rx) = futures::channel::mpsc::unbounded::<Result<u64, String>>();
//!     let incoming = futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
//!
//!     let (mut stream, mut sink) = GuaranteeChannel::new(incoming, inner_tx).split();
//!
//!     sink.add(42).await.unwrap();
//!     while let Some(event) = stream.next().await {
//!         println!("Received: {:?}", event);
//!     }
//!
//!     // The read side is gone: this write is silently dropped.
//!     sink.add(43).await.unwrap();
//!     assert_eq!(inner_rx.next().await, Some(Ok(42)));
//! }
//! ```

mod add_stream;
mod channel;
mod config;
mod error;
mod invariants;
mod sink;
mod state;
mod stream;

pub use add_stream::{AddStream, AddStreamOutcome};
pub use channel::GuaranteeChannel;
pub use config::ChannelConfig;
pub use error::{GuaranteeError, InvalidState};
pub use sink::GuaranteeSink;
pub use stream::ChannelStream;

// Re-export the broadcast adapter's error type used by `from_broadcast`
pub use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
