//! Reconnection policy for progress sockets.
//!
//! Two decisions live here: *whether* a lost socket should be re-opened
//! ([`CloseCause::should_reconnect`]) and *how long* to wait first
//! ([`next_delay`]).
//!
//! The default is a fixed 3 second retry with no attempt ceiling. A
//! multiplier above `1.0` turns on exponential backoff capped at
//! [`ReconnectConfig::max_delay`].

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Retry delay used when nothing else is configured.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Tunable parameters for the retry delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure. `1.0` keeps
    /// the delay fixed.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl ReconnectConfig {
    /// Retry every `delay`, forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Start at `initial`, multiply by `multiplier` after each failed
    /// attempt, never exceed `max`.
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            multiplier,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

// ---------------------------------------------------------------------------
// Close classification
// ---------------------------------------------------------------------------

/// How a socket session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The client closed the channel on purpose.
    Intentional,
    /// The client dropped the socket to reconnect straight away.
    Forced,
    /// The server sent a close frame with a status code.
    Remote { code: u16, reason: String },
    /// The session ended with no status code: an empty close frame, or
    /// the stream ending without one.
    NoStatus,
    /// Sending or receiving failed.
    Transport(String),
    /// The socket could not be opened at all.
    ConnectFailed(String),
}

impl CloseCause {
    /// Classify a received close frame.
    pub fn from_frame(frame: Option<&CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => match u16::from(frame.code) {
                CLOSE_NO_STATUS => Self::NoStatus,
                code => Self::Remote {
                    code,
                    reason: frame.reason.to_string(),
                },
            },
            None => Self::NoStatus,
        }
    }

    /// The close code to report, if the cause has one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Intentional => Some(CLOSE_NORMAL),
            Self::Remote { code, .. } => Some(*code),
            Self::NoStatus => Some(CLOSE_NO_STATUS),
            Self::Forced | Self::Transport(_) | Self::ConnectFailed(_) => None,
        }
    }

    /// Whether the channel should be re-opened.
    ///
    /// Intentional closes, normal closure and the no-status/abnormal codes
    /// are final. Those last two show up when a socket is opened and
    /// closed in quick succession and do not indicate a network fault.
    pub fn should_reconnect(&self) -> bool {
        match self {
            Self::Intentional | Self::NoStatus => false,
            Self::Remote { code, .. } => {
                !matches!(*code, CLOSE_NORMAL | CLOSE_NO_STATUS | CLOSE_ABNORMAL)
            }
            Self::Forced | Self::Transport(_) | Self::ConnectFailed(_) => true,
        }
    }

    /// Forced reconnects skip the retry delay.
    pub fn skips_delay(&self) -> bool {
        matches!(self, Self::Forced)
    }
}
