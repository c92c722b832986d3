//! Connection lifecycle events emitted by the connection manager.
//!
//! Subscribers use these to show a transient "reconnecting" indicator
//! without implying that the displayed progress was lost.

use serde::Serialize;
use stagewatch_core::types::JobId;

/// A lifecycle change on one job's progress channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionEvent {
    /// A connection attempt started. `attempt` counts from 1 and resets
    /// after every successful open.
    Connecting { job_id: JobId, attempt: u32 },

    /// The socket is open.
    Connected { job_id: JobId },

    /// An open socket was lost.
    Disconnected {
        job_id: JobId,
        /// Close code, when the cause carries one.
        code: Option<u16>,
        /// Whether a retry will follow.
        will_retry: bool,
    },

    /// A retry is scheduled after `delay_ms`.
    RetryScheduled {
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
    },

    /// The channel was closed on purpose and will not reconnect.
    Closed { job_id: JobId },
}

impl ConnectionEvent {
    /// Job the event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            Self::Connecting { job_id, .. }
            | Self::Connected { job_id }
            | Self::Disconnected { job_id, .. }
            | Self::RetryScheduled { job_id, .. }
            | Self::Closed { job_id } => job_id,
        }
    }
}
