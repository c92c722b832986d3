use std::time::Duration;

use stagewatch_client::{ManagerConfig, ReconnectConfig};

/// Default REST origin for local development.
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Watcher configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    /// REST origin; the socket origin is derived from it.
    pub api_url: String,
    pub reconnect: ReconnectConfig,
    /// Optional bound on each connection attempt.
    pub connect_timeout: Option<Duration>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: None,
        }
    }
}

impl WatchConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                             | Default                 |
    /// |-------------------------------------|-------------------------|
    /// | `STAGEWATCH_API_URL`                | `http://localhost:3000` |
    /// | `STAGEWATCH_RECONNECT_DELAY_MS`     | `3000`                  |
    /// | `STAGEWATCH_RECONNECT_MAX_DELAY_MS` | `30000`                 |
    /// | `STAGEWATCH_RECONNECT_MULTIPLIER`   | `1.0` (fixed interval)  |
    /// | `STAGEWATCH_CONNECT_TIMEOUT_SECS`   | unset                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("STAGEWATCH_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let delay_ms: u64 = parse_var(&lookup, "STAGEWATCH_RECONNECT_DELAY_MS", 3000)?;
        if delay_ms == 0 {
            return Err(ConfigError::invalid(
                "STAGEWATCH_RECONNECT_DELAY_MS",
                "0",
                "must be greater than zero",
            ));
        }
        let max_delay_ms: u64 = parse_var(&lookup, "STAGEWATCH_RECONNECT_MAX_DELAY_MS", 30_000)?;
        let multiplier: f64 = parse_var(&lookup, "STAGEWATCH_RECONNECT_MULTIPLIER", 1.0)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "STAGEWATCH_RECONNECT_MULTIPLIER",
                multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        let delay = Duration::from_millis(delay_ms);
        let reconnect = if multiplier == 1.0 {
            ReconnectConfig::fixed(delay)
        } else {
            ReconnectConfig::exponential(delay, Duration::from_millis(max_delay_ms), multiplier)
        };

        let connect_timeout = match lookup("STAGEWATCH_CONNECT_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = parse_value("STAGEWATCH_CONNECT_TIMEOUT_SECS", &raw)?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(Self {
            api_url,
            reconnect,
            connect_timeout,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconnect: self.reconnect,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => parse_value(var, &raw),
        _ => Ok(default),
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, raw, e.to_string()))
}

/// A configuration variable that could not be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.into(),
            reason: reason.into(),
        }
    }
}
