//! WebSocket client for a job's progress endpoint.
//!
//! [`ProgressClient`] holds the endpoint for one job. Call
//! [`ProgressClient::connect`] to establish a live
//! [`ProgressConnection`]. The socket URL is derived from the REST API
//! origin by swapping `http` for `ws` (and `https` for `wss`).

use std::time::Duration;

use stagewatch_core::frames::progress_path;
use stagewatch_core::types::JobId;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw socket type used for progress connections.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Endpoint handle for one job's progress stream.
pub struct ProgressClient {
    job_id: JobId,
    url: String,
    connect_timeout: Option<Duration>,
}

/// A live WebSocket connection to a job's progress stream.
pub struct ProgressConnection {
    pub job_id: JobId,
    /// Random id used to correlate log lines for this socket.
    pub connection_id: uuid::Uuid,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ProgressClient {
    /// Create a client for `job_id` against the REST origin `api_url`
    /// (e.g. `https://dashboard.example.com`).
    pub fn new(job_id: impl Into<JobId>, api_url: &str) -> Result<Self, EndpointError> {
        let job_id = job_id.into();
        let url = progress_url(api_url, &job_id)?;
        Ok(Self {
            job_id,
            url,
            connect_timeout: None,
        })
    }

    /// Give up on a connection attempt after `timeout`. Without this the
    /// transport's own timeout applies.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Full socket URL, e.g. `wss://host/api/v1/projects/42/progress`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the WebSocket.
    pub async fn connect(&self) -> Result<ProgressConnection, ClientError> {
        let handshake = connect_async(self.url.as_str());
        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .map_err(|_| ClientError::Timeout(timeout))?,
            None => handshake.await,
        };
        let (ws_stream, _response) = result.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {}: {e}", self.url))
        })?;

        let connection_id = uuid::Uuid::new_v4();
        tracing::info!(
            job_id = %self.job_id,
            connection_id = %connection_id,
            "Connected to progress stream at {}",
            self.url,
        );

        Ok(ProgressConnection {
            job_id: self.job_id.clone(),
            connection_id,
            ws_stream,
        })
    }
}

/// Derive the socket origin from the REST origin.
///
/// `http://` becomes `ws://` and `https://` becomes `wss://`; socket
/// schemes pass through unchanged. Any trailing `/` is dropped. A base
/// path (e.g. `https://host/dashboard`) is kept.
pub fn socket_origin(api_url: &str) -> Result<String, EndpointError> {
    let (scheme, rest) = api_url
        .trim()
        .split_once("://")
        .ok_or_else(|| EndpointError::MissingScheme(api_url.to_string()))?;
    let rest = rest.trim_end_matches('/');

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };

    if rest.is_empty() || rest.starts_with('/') {
        return Err(EndpointError::MissingHost(api_url.to_string()));
    }

    Ok(format!("{ws_scheme}://{rest}"))
}

/// Full socket URL of a job's progress endpoint.
pub fn progress_url(api_url: &str, job_id: &str) -> Result<String, EndpointError> {
    if job_id.is_empty() || job_id.contains(['/', '?', '#']) || job_id.contains(char::is_whitespace)
    {
        return Err(EndpointError::InvalidJobId(job_id.to_string()));
    }
    Ok(format!("{}{}", socket_origin(api_url)?, progress_path(job_id)))
}

/// Errors building a progress endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("API URL has no scheme: '{0}'")]
    MissingScheme(String),

    #[error("Unsupported API URL scheme: '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("API URL has no host: '{0}'")]
    MissingHost(String),

    #[error("Invalid job id: '{0}'")]
    InvalidJobId(String),
}

/// Errors that can occur when opening a connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection attempt exceeded the configured timeout.
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),
}
