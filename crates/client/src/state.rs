//! Lifecycle state machine for one progress channel.
//!
//! ```text
//! Idle -> Connecting -> Open -> ClosingIntentional -> Idle
//!            |  ^        |
//!            v  |        v
//!          Retrying <----+   (unexpected loss, retry allowed)
//!                        |
//!                        +-> Idle  (loss that must not be retried)
//! ```
//!
//! Transitions are computed by [`ChannelState::next`]. Anything not
//! listed there is rejected, so e.g. a socket that finishes its handshake
//! after the caller closed the channel cannot flip it back to `Open`.

use std::fmt;

use serde::Serialize;

/// Where a channel is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Open,
    ClosingIntentional,
    Retrying,
}

/// Inputs that drive [`ChannelState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Start a connection attempt.
    Connect,
    /// The handshake completed.
    Opened,
    /// The handshake failed.
    ConnectFailed,
    /// An open socket was lost; `retry` says whether the loss is
    /// actionable.
    Lost { retry: bool },
    /// The retry delay elapsed (or was cut short).
    RetryElapsed,
    /// The caller closed the channel.
    CloseRequested,
    /// The channel task finished shutting down.
    Closed,
}

/// A transition not allowed from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid channel transition: {event:?} in state {from}")]
pub struct InvalidTransition {
    pub from: ChannelState,
    pub event: ChannelEvent,
}

impl ChannelState {
    /// Compute the state after `event`.
    pub fn next(self, event: ChannelEvent) -> Result<ChannelState, InvalidTransition> {
        use ChannelEvent as E;
        use ChannelState as S;

        let next = match (self, event) {
            (S::Idle, E::Connect) => S::Connecting,
            (S::Connecting, E::Opened) => S::Open,
            (S::Connecting, E::ConnectFailed) => S::Retrying,
            (S::Open, E::Lost { retry: true }) => S::Retrying,
            (S::Open, E::Lost { retry: false }) => S::Idle,
            (S::Retrying, E::RetryElapsed) => S::Connecting,
            (S::Connecting | S::Open | S::Retrying, E::CloseRequested) => S::ClosingIntentional,
            (S::ClosingIntentional, E::Closed) => S::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// A channel in this state owns (or is about to own) a socket, so
    /// opening the same job again must not create a second one.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Retrying)
    }

    pub fn is_connected(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosingIntentional => "closing_intentional",
            Self::Retrying => "retrying",
        };
        f.write_str(name)
    }
}
