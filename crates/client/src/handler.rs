//! Callback seam between a channel and whatever consumes its frames.

use crate::reconnect::CloseCause;

/// Receives decoded frames and lifecycle callbacks for one channel.
///
/// The handler is injected when the channel is opened and kept for the
/// channel's lifetime, across reconnects. Callbacks run on the channel
/// task in frame delivery order and must not block.
pub trait ChannelHandler: Send + Sync + 'static {
    /// A decoded payload frame (control frames are never forwarded).
    fn on_message(&self, job_id: &str, message: serde_json::Value);

    /// The socket opened (first time or after a reconnect).
    fn on_open(&self, _job_id: &str) {}

    /// The socket closed. Called once per session.
    fn on_close(&self, _job_id: &str, _cause: &CloseCause) {}

    /// A transport error or failed connection attempt.
    fn on_error(&self, _job_id: &str, _error: &str) {}
}
