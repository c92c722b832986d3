//! Realtime progress client.
//!
//! Opens one WebSocket per job, answers the server heartbeat, reconnects
//! after unexpected loss, and feeds decoded updates into a
//! [`stagewatch_events::ProgressStore`] through [`ProgressTracker`].

pub mod client;
pub mod events;
pub mod handler;
pub mod manager;
pub mod messages;
mod processor;
pub mod reconnect;
pub mod state;
pub mod tracker;

pub use client::{ClientError, EndpointError, ProgressClient};
pub use events::ConnectionEvent;
pub use handler::ChannelHandler;
pub use manager::{ConnectionManager, ManagerConfig, OpenOutcome};
pub use reconnect::{CloseCause, ReconnectConfig};
pub use state::ChannelState;
pub use tracker::{LinkStatus, ProgressTracker, ProgressView};
