//! Log sink used by the connection manager

/// Destination for the manager's log lines.
///
/// All methods are fire-and-forget and must not block.
pub trait LogSink: Send + Sync {
    /// Record an informational line
    fn log(&self, source: &str, message: &str);

    /// Record a verbose line; dropped unless `enabled`
    fn log_debug(&self, source: &str, message: &str, enabled: bool);

    /// Record a failure
    fn log_error(&self, source: &str, message: &str) {
        self.log(source, &format!("ERROR: {}", message));
    }
}

/// Default sink forwarding to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, source: &str, message: &str) {
        tracing::info!(source, "{}", message);
    }

    fn log_debug(&self, source: &str, message: &str, enabled: bool) {
        if !enabled {
            return;
        }
        tracing::info!(source, verbose = true, "{}", message);
    }

    fn log_error(&self, source: &str, message: &str) {
        tracing::error!(source, "{}", message);
    }
}
