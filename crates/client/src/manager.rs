//! Per-job progress channel manager.
//!
//! [`ConnectionManager`] keeps at most one live channel per job id. Each
//! channel is a spawned task that connects, processes frames, and
//! reconnects after unexpected loss, until the channel is closed on
//! purpose. Lifecycle changes are published per job as a
//! [`ChannelState`] watch and for all jobs as [`ConnectionEvent`]s on a
//! broadcast channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stagewatch_core::types::JobId;
use tokio::sync::{broadcast, mpsc, watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::{EndpointError, ProgressClient};
use crate::events::ConnectionEvent;
use crate::handler::ChannelHandler;
use crate::processor::{run_session, SessionControl};
use crate::reconnect::{next_delay, CloseCause, ReconnectConfig};
use crate::state::{ChannelEvent, ChannelState};

/// Broadcast channel capacity for connection events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long [`ConnectionManager::shutdown`] waits for each channel task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every channel of a manager.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub reconnect: ReconnectConfig,
    /// Optional bound on each connection attempt.
    pub connect_timeout: Option<Duration>,
}

/// Result of [`ConnectionManager::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new channel task was started.
    Spawned,
    /// A channel for this job is already connecting, open or retrying.
    AlreadyActive,
}

/// Manages progress channels for any number of jobs.
///
/// Share it as `Arc<ConnectionManager>`. Dropping the manager cancels
/// every channel.
pub struct ConnectionManager {
    /// Channels indexed by job id.
    channels: RwLock<HashMap<JobId, ManagedChannel>>,
    api_url: String,
    config: ManagerConfig,
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for one job's channel.
struct ManagedChannel {
    state_tx: Arc<watch::Sender<ChannelState>>,
    outbound: mpsc::UnboundedSender<String>,
    force_reconnect: Arc<Notify>,
    /// Per-channel cancellation token (child of the master token).
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

impl ManagedChannel {
    fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }
}

impl ConnectionManager {
    /// Create a manager for sockets derived from the REST origin
    /// `api_url`.
    pub fn new(api_url: impl Into<String>, config: ManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            channels: RwLock::new(HashMap::new()),
            api_url: api_url.into(),
            config,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to lifecycle events for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Open the progress channel for `job_id`.
    ///
    /// Idempotent: while a channel for the job is connecting, open or
    /// retrying, this returns [`OpenOutcome::AlreadyActive`] and the
    /// existing channel keeps its original handler.
    pub async fn open(
        &self,
        job_id: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<OpenOutcome, EndpointError> {
        let mut channels = self.channels.write().await;
        if let Some(existing) = channels.get(job_id) {
            if existing.state().is_active() {
                tracing::debug!(job_id, state = %existing.state(), "Channel already active");
                return Ok(OpenOutcome::AlreadyActive);
            }
        }

        let client = ProgressClient::new(job_id, &self.api_url)?
            .with_connect_timeout(self.config.connect_timeout);

        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let state_tx = Arc::new(state_tx);
        transition(&state_tx, job_id, ChannelEvent::Connect);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let force_reconnect = Arc::new(Notify::new());
        let cancel = self.cancel.child_token();

        let task = ChannelTask {
            client,
            handler,
            state_tx: Arc::clone(&state_tx),
            outbound: outbound_rx,
            force_reconnect: Arc::clone(&force_reconnect),
            cancel: cancel.clone(),
            event_tx: self.event_tx.clone(),
            reconnect: self.config.reconnect,
        };

        let task_job_id = job_id.to_string();
        let task_handle = tokio::spawn(async move {
            tracing::info!(job_id = %task_job_id, "Starting progress channel");
            task.run().await;
            tracing::info!(job_id = %task_job_id, "Progress channel task exited");
        });

        if let Some(previous) = channels.insert(
            job_id.to_string(),
            ManagedChannel {
                state_tx,
                outbound: outbound_tx,
                force_reconnect,
                cancel,
                task_handle,
            },
        ) {
            // Only inactive channels are replaced; make sure their task is gone.
            previous.cancel.cancel();
        }

        Ok(OpenOutcome::Spawned)
    }

    /// Send a JSON message on the job's channel.
    ///
    /// Delivered only while the channel is open. Otherwise the message is
    /// dropped with a warning and `false` is returned.
    pub async fn send(&self, job_id: &str, message: &serde_json::Value) -> bool {
        let channels = self.channels.read().await;
        let Some(managed) = channels.get(job_id) else {
            tracing::warn!(job_id, "Dropping outbound message: no channel for job");
            return false;
        };
        let state = managed.state();
        if !state.is_connected() {
            tracing::warn!(job_id, %state, "Dropping outbound message: channel not open");
            return false;
        }
        managed.outbound.send(message.to_string()).is_ok()
    }

    /// Close the job's channel on purpose.
    ///
    /// The channel is marked as intentionally closing before its task is
    /// cancelled, so no retry can be scheduled afterwards. Returns `false`
    /// if there was no channel for the job.
    pub async fn close(&self, job_id: &str) -> bool {
        let Some(managed) = self.channels.write().await.remove(job_id) else {
            tracing::debug!(job_id, "Close requested for unknown channel");
            return false;
        };
        if managed.state().is_active() {
            transition(&managed.state_tx, job_id, ChannelEvent::CloseRequested);
        }
        managed.cancel.cancel();
        tracing::info!(job_id, "Progress channel closed");
        true
    }

    /// Drop the current socket (or skip the pending retry delay) and
    /// connect again now. This is not an intentional close.
    ///
    /// Returns `false` when the job has no channel that is open or
    /// waiting to retry.
    pub async fn force_reconnect(&self, job_id: &str) -> bool {
        let channels = self.channels.read().await;
        let Some(managed) = channels.get(job_id) else {
            return false;
        };
        match managed.state() {
            ChannelState::Open | ChannelState::Retrying => {
                managed.force_reconnect.notify_one();
                true
            }
            state => {
                tracing::debug!(job_id, %state, "Ignoring forced reconnect");
                false
            }
        }
    }

    /// Current state of the job's channel, if one exists.
    pub async fn state(&self, job_id: &str) -> Option<ChannelState> {
        self.channels.read().await.get(job_id).map(ManagedChannel::state)
    }

    /// Watch the job's channel state. The receiver reports the final state
    /// and then closes once the channel is gone.
    pub async fn watch_state(&self, job_id: &str) -> Option<watch::Receiver<ChannelState>> {
        self.channels
            .read()
            .await
            .get(job_id)
            .map(|managed| managed.state_tx.subscribe())
    }

    /// Ids of every job with a channel entry.
    pub async fn job_ids(&self) -> Vec<JobId> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Close every channel on purpose and wait (bounded) for the tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down progress connection manager");

        let mut channels = self.channels.write().await;
        for (job_id, managed) in channels.drain() {
            if managed.state().is_active() {
                transition(&managed.state_tx, &job_id, ChannelEvent::CloseRequested);
            }
            managed.cancel.cancel();
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, managed.task_handle).await;
        }
        self.cancel.cancel();

        tracing::info!("Progress connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Apply `event` to a channel's state, logging and ignoring transitions
/// the state machine does not allow. Returns the resulting state.
fn transition(
    state_tx: &watch::Sender<ChannelState>,
    job_id: &str,
    event: ChannelEvent,
) -> ChannelState {
    let mut result = ChannelState::Idle;
    state_tx.send_if_modified(|state| match state.next(event) {
        Ok(next) => {
            result = next;
            let changed = next != *state;
            *state = next;
            changed
        }
        Err(e) => {
            result = *state;
            tracing::debug!(job_id, error = %e, "Ignoring channel transition");
            false
        }
    });
    result
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

/// Everything one channel task owns.
struct ChannelTask {
    client: ProgressClient,
    handler: Arc<dyn ChannelHandler>,
    state_tx: Arc<watch::Sender<ChannelState>>,
    outbound: mpsc::UnboundedReceiver<String>,
    force_reconnect: Arc<Notify>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<ConnectionEvent>,
    reconnect: ReconnectConfig,
}

impl ChannelTask {
    /// Core channel loop: connect -> process frames -> retry.
    ///
    /// Runs until the channel is cancelled or a loss that must not be
    /// retried.
    async fn run(mut self) {
        let job_id = self.client.job_id().to_string();
        let mut attempt = 0u32;
        let mut delay = self.reconnect.initial_delay;

        loop {
            attempt += 1;
            self.emit(ConnectionEvent::Connecting {
                job_id: job_id.clone(),
                attempt,
            });

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.client.connect() => result,
            };

            let cause = match connected {
                Ok(conn) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if transition(&self.state_tx, &job_id, ChannelEvent::Opened)
                        != ChannelState::Open
                    {
                        break;
                    }
                    attempt = 0;
                    delay = self.reconnect.initial_delay;
                    self.emit(ConnectionEvent::Connected {
                        job_id: job_id.clone(),
                    });
                    self.handler.on_open(&job_id);

                    let cause = run_session(
                        conn.ws_stream,
                        &job_id,
                        self.handler.as_ref(),
                        &mut self.outbound,
                        SessionControl {
                            cancel: &self.cancel,
                            force_reconnect: &self.force_reconnect,
                        },
                    )
                    .await;

                    if cause == CloseCause::Intentional {
                        self.handler.on_close(&job_id, &cause);
                        break;
                    }

                    let retry = cause.should_reconnect();
                    let state = transition(&self.state_tx, &job_id, ChannelEvent::Lost { retry });
                    self.handler.on_close(&job_id, &cause);
                    if state == ChannelState::ClosingIntentional {
                        // Closed by the caller while the socket was going down.
                        break;
                    }
                    self.emit(ConnectionEvent::Disconnected {
                        job_id: job_id.clone(),
                        code: cause.code(),
                        will_retry: retry,
                    });
                    if !retry {
                        tracing::info!(job_id = %job_id, code = ?cause.code(), "Progress socket closed, not reconnecting");
                        return;
                    }
                    tracing::warn!(job_id = %job_id, cause = ?cause, "Progress socket lost");
                    cause
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "Connection attempt failed");
                    self.handler.on_error(&job_id, &e.to_string());
                    transition(&self.state_tx, &job_id, ChannelEvent::ConnectFailed);
                    CloseCause::ConnectFailed(e.to_string())
                }
            };

            if self.cancel.is_cancelled() {
                break;
            }

            if !cause.skips_delay() {
                self.emit(ConnectionEvent::RetryScheduled {
                    job_id: job_id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                tracing::info!(job_id = %job_id, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to progress stream");

                // Wait before the next attempt, respecting cancellation.
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = self.force_reconnect.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = next_delay(delay, &self.reconnect);
            }

            if transition(&self.state_tx, &job_id, ChannelEvent::RetryElapsed)
                != ChannelState::Connecting
            {
                break;
            }
        }

        self.finish_intentional(&job_id);
    }

    /// Settle the state after cancellation and announce the close.
    fn finish_intentional(&self, job_id: &str) {
        if self.state_tx.borrow().is_active() {
            transition(&self.state_tx, job_id, ChannelEvent::CloseRequested);
        }
        transition(&self.state_tx, job_id, ChannelEvent::Closed);
        self.emit(ConnectionEvent::Closed {
            job_id: job_id.to_string(),
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.event_tx.send(event);
    }
}
