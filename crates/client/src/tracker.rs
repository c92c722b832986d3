//! Presentation-facing facade for one job.
//!
//! A [`ProgressTracker`] opens the job's channel on a shared
//! [`ConnectionManager`], routes decoded payloads into the job's
//! [`ProgressStore`] from a [`StoreRegistry`], and folds snapshot, logs,
//! and channel state into a single [`ProgressView`] watch for renderers.

use std::sync::Arc;

use serde::Serialize;
use stagewatch_core::types::JobId;
use stagewatch_events::{LogsRef, ProgressStore, SnapshotRef, StoreRegistry};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::EndpointError;
use crate::handler::ChannelHandler;
use crate::manager::{ConnectionManager, OpenOutcome};
use crate::messages::{parse_server_message, ServerMessage};
use crate::reconnect::CloseCause;
use crate::state::ChannelState;

/// Connectivity as a renderer should present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// First connection attempt in flight.
    Connecting,
    Connected,
    /// The link dropped and a retry is pending or in flight.
    Reconnecting,
    /// Closed on purpose, or lost in a way that is not retried.
    Closed,
}

impl LinkStatus {
    /// Map a channel state. `was_connected` tells a first attempt apart
    /// from a reconnect.
    pub fn from_state(state: ChannelState, was_connected: bool) -> Self {
        match state {
            ChannelState::Open => Self::Connected,
            ChannelState::Retrying => Self::Reconnecting,
            ChannelState::Connecting if was_connected => Self::Reconnecting,
            ChannelState::Connecting => Self::Connecting,
            ChannelState::Idle | ChannelState::ClosingIntentional => Self::Closed,
        }
    }
}

/// Everything a progress display needs, published as one value.
#[derive(Debug, Clone)]
pub struct ProgressView {
    pub snapshot: SnapshotRef,
    pub logs: LogsRef,
    pub is_connected: bool,
    pub link: LinkStatus,
}

/// Routes channel payloads into a store.
struct StoreHandler {
    store: Arc<ProgressStore>,
}

impl ChannelHandler for StoreHandler {
    fn on_message(&self, job_id: &str, message: serde_json::Value) {
        match parse_server_message(message) {
            Ok(ServerMessage::Progress(update)) => {
                self.store.apply_update(&update);
            }
            Ok(ServerMessage::Log(payload)) => {
                self.store.add_log(payload.into_entry(chrono::Utc::now()));
            }
            Ok(ServerMessage::Other(kind)) => {
                tracing::debug!(job_id, kind = %kind, "Ignoring unhandled message type");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to decode progress payload");
            }
        }
    }

    fn on_close(&self, job_id: &str, cause: &CloseCause) {
        tracing::debug!(job_id, ?cause, "Progress channel closed");
    }
}

/// Live progress for one job.
///
/// Dropping the tracker stops view updates but leaves the channel to the
/// manager; call [`ProgressTracker::stop`] to close it.
pub struct ProgressTracker {
    job_id: JobId,
    manager: Arc<ConnectionManager>,
    store: Arc<ProgressStore>,
    view_rx: watch::Receiver<ProgressView>,
    view_task: JoinHandle<()>,
}

impl ProgressTracker {
    /// Open `job_id` on `manager`, feeding the job's store in `stores`.
    ///
    /// If the job already has an active channel, that channel (and the
    /// handler it was opened with) is reused. Trackers started through the
    /// same registry read the same store, so every view of a job moves
    /// together.
    pub async fn start(
        manager: Arc<ConnectionManager>,
        stores: &StoreRegistry,
        job_id: impl Into<JobId>,
    ) -> Result<Self, EndpointError> {
        let job_id = job_id.into();
        let store = stores.get_or_create(&job_id).await;
        let handler = Arc::new(StoreHandler {
            store: Arc::clone(&store),
        });
        if manager.open(&job_id, handler).await? == OpenOutcome::AlreadyActive {
            tracing::info!(job_id = %job_id, "Reusing active progress channel");
        }

        let state_rx = match manager.watch_state(&job_id).await {
            Some(rx) => rx,
            // Channel already gone again; present it as closed.
            None => watch::channel(ChannelState::Idle).1,
        };
        let snapshot_rx = store.subscribe();
        let logs_rx = store.subscribe_logs();

        let initial = build_view(
            &snapshot_rx.borrow(),
            &logs_rx.borrow(),
            *state_rx.borrow(),
            false,
        );
        let (view_tx, view_rx) = watch::channel(initial);
        let view_task = tokio::spawn(run_view(snapshot_rx, logs_rx, state_rx, view_tx));

        Ok(Self {
            job_id,
            manager,
            store,
            view_rx,
            view_task,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Subscribe to view changes.
    pub fn view(&self) -> watch::Receiver<ProgressView> {
        self.view_rx.clone()
    }

    /// The latest view.
    pub fn current(&self) -> ProgressView {
        self.view_rx.borrow().clone()
    }

    pub fn snapshot(&self) -> SnapshotRef {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Reconnect now, keeping the displayed progress.
    pub async fn reconnect(&self) -> bool {
        self.manager.force_reconnect(&self.job_id).await
    }

    /// Send a JSON message to the server. Dropped unless connected.
    pub async fn send(&self, message: &serde_json::Value) -> bool {
        self.manager.send(&self.job_id, message).await
    }

    /// Back to the all-pending snapshot. Logs are kept.
    pub fn reset(&self) {
        self.store.reset();
    }

    pub fn clear_logs(&self) {
        self.store.clear_logs();
    }

    /// Close the channel on purpose. No reconnect follows.
    pub async fn stop(self) {
        self.manager.close(&self.job_id).await;
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.view_task.abort();
    }
}

fn build_view(
    snapshot: &SnapshotRef,
    logs: &LogsRef,
    state: ChannelState,
    was_connected: bool,
) -> ProgressView {
    let link = LinkStatus::from_state(state, was_connected);
    ProgressView {
        snapshot: Arc::clone(snapshot),
        logs: Arc::clone(logs),
        is_connected: link == LinkStatus::Connected,
        link,
    }
}

/// Republish the combined view whenever any input changes.
async fn run_view(
    mut snapshot_rx: watch::Receiver<SnapshotRef>,
    mut logs_rx: watch::Receiver<LogsRef>,
    mut state_rx: watch::Receiver<ChannelState>,
    view_tx: watch::Sender<ProgressView>,
) {
    let mut was_connected = false;
    let mut state_live = true;

    loop {
        let state = *state_rx.borrow_and_update();
        let view = build_view(
            &snapshot_rx.borrow_and_update(),
            &logs_rx.borrow_and_update(),
            state,
            was_connected,
        );
        was_connected |= state.is_connected();
        view_tx.send_replace(view);

        tokio::select! {
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = logs_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = state_rx.changed(), if state_live => {
                if changed.is_err() {
                    // Channel removed; the last state stays in the view.
                    state_live = false;
                }
            }
        }
    }
}
