//! Wire constants for the job progress WebSocket.
//!
//! Control frames carry a top-level `event` discriminator; payload frames
//! carry an optional `type` plus a `data` object.

/// Server heartbeat. Must be answered with [`EVENT_PONG`].
pub const EVENT_PING: &str = "ping";

/// Client heartbeat reply.
pub const EVENT_PONG: &str = "pong";

/// Server acknowledgement sent once after the socket opens.
pub const EVENT_CONNECTED: &str = "connected";

/// Payload carrying a partial progress update.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Payload carrying a single log line.
pub const MSG_TYPE_LOG: &str = "log";

/// Path prefix of the progress endpoint, relative to the API origin.
pub const PROGRESS_PATH_PREFIX: &str = "/api/v1/projects";

/// Build the progress endpoint path for a job, e.g.
/// `/api/v1/projects/42/progress`.
pub fn progress_path(job_id: &str) -> String {
    format!("{PROGRESS_PATH_PREFIX}/{job_id}/progress")
}
