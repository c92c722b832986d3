//! Domain model for job progress tracking.
//!
//! Pure types and functions with no I/O:
//!
//! - [`progress`]: the displayed snapshot and the partial updates
//!   pushed by the server.
//! - [`merge`]: the anti-rollback merge of an update onto a snapshot.
//! - [`log`]: job log lines.
//! - [`frames`]: wire constants for the progress WebSocket.

pub mod error;
pub mod frames;
pub mod log;
pub mod merge;
pub mod progress;
pub mod types;

pub use error::CoreError;
