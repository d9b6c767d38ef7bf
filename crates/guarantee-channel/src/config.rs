//! Configuration for channel behavior.

/// Configuration for a [`GuaranteeChannel`](crate::GuaranteeChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Whether error events written to the sink are forwarded to the inner sink.
    ///
    /// When `false`, writing an error event tears the channel down in both
    /// directions and hands the error back to the writer instead.
    ///
    /// Default: `true`
    pub allow_sink_errors: bool,

    /// Events an [`AddStream`](crate::AddStream) forwards per poll before
    /// yielding back to the executor.
    ///
    /// An always-ready source would otherwise starve the read side on a
    /// single-threaded executor, and a disconnect could never cancel it.
    /// Values below 1 are treated as 1.
    ///
    /// Default: 32
    pub forward_budget: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            allow_sink_errors: true,
            forward_budget: 32,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration that treats any written error as fatal.
    pub fn strict() -> Self {
        Self {
            allow_sink_errors: false,
            ..Self::default()
        }
    }

    /// Sets whether error events may be written to the sink.
    pub fn with_allow_sink_errors(mut self, allow: bool) -> Self {
        self.allow_sink_errors = allow;
        self
    }

    /// Sets the forward budget.
    pub fn with_forward_budget(mut self, budget: usize) -> Self {
        self.forward_budget = budget;
        self
    }
}
