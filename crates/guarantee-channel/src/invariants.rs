//! Debug assertion macros for the channel's shutdown invariants.
//!
//! These are only active in debug builds (`#[cfg(debug_assertions)]`), so
//! there is zero overhead in release builds.

// =============================================================================
// Read-side end releases the sink
// =============================================================================

/// Assert that the sink was marked disconnected before the relay yields `None`.
///
/// **Invariant**: `inner stream ended → sink disconnected → consumer sees end`
///
/// Used in: `ChannelStream::poll_next()` on the inner stream's end
macro_rules! debug_assert_sink_released {
    ($write:expr) => {
        debug_assert!(
            $write.is_disconnected(),
            "relay ended while the sink still accepts writes"
        )
    };
}

// =============================================================================
// Sink close silences the relay
// =============================================================================

/// Assert that closing the sink left the relay stream terminated.
///
/// **Invariant**: `sink closed → inner stream dropped → relay yields None`
///
/// Used in: `GuaranteeSink::poll_close()` after the cascade
macro_rules! debug_assert_relay_released {
    ($read:expr) => {
        debug_assert!(
            $read.is_terminated(),
            "sink closed while the relay can still deliver events"
        )
    };
}

// =============================================================================
// Single add-stream slot
// =============================================================================

/// Assert that no add-stream operation is installed over another one.
///
/// **Invariant**: `at most one pending add_stream at a time`
///
/// Used in: `GuaranteeSink::add_stream()` before installing the operation
macro_rules! debug_assert_add_slot_free {
    ($write:expr) => {
        debug_assert!(
            !matches!($write, $crate::state::WriteState::AddingStream(_)),
            "add_stream installed while another is pending"
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_add_slot_free;
pub(crate) use debug_assert_relay_released;
pub(crate) use debug_assert_sink_released;
