//! Terminal front end for following one job's progress.

pub mod config;
pub mod render;

pub use config::{ConfigError, WatchConfig};
