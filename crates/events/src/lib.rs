//! Progress state ownership and publication.
//!
//! - [`ProgressStore`]: single-writer store for one job's snapshot and
//!   logs, published to readers over `tokio::sync::watch`.
//! - [`StoreRegistry`]: process-wide stores keyed by job id.

pub mod registry;
pub mod store;

pub use registry::StoreRegistry;
pub use store::{LogsRef, ProgressStore, SnapshotRef};
