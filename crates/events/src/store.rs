//! Single-writer store for the active job's progress and logs.
//!
//! [`ProgressStore`] owns the canonical [`JobProgressSnapshot`] and the
//! job's [`LogEntry`] list. Every mutation goes through one of its
//! methods; readers only ever see immutable `Arc` values published over
//! `tokio::sync::watch`.
//!
//! The state lives inside the watch senders themselves, so the watch
//! lock is the only lock and a merge is never interleaved with another
//! writer.

use std::sync::Arc;

use stagewatch_core::log::LogEntry;
use stagewatch_core::merge::{merge_update, MergeOutcome, MergePolicy};
use stagewatch_core::progress::{JobProgressSnapshot, ProgressUpdate};
use tokio::sync::watch;

/// Shared, immutable view of a snapshot.
pub type SnapshotRef = Arc<JobProgressSnapshot>;

/// Shared, immutable view of the log list.
pub type LogsRef = Arc<Vec<LogEntry>>;

/// Progress and log state for one job.
///
/// Designed to be shared as `Arc<ProgressStore>` between the connection
/// handler (the writer) and any number of presentation readers.
pub struct ProgressStore {
    snapshot_tx: watch::Sender<SnapshotRef>,
    logs_tx: watch::Sender<LogsRef>,
    policy: MergePolicy,
}

impl ProgressStore {
    /// Create a store holding the default all-pending snapshot.
    pub fn new() -> Self {
        Self::with_policy(MergePolicy::default())
    }

    /// Create a store with a non-default merge policy.
    pub fn with_policy(policy: MergePolicy) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(JobProgressSnapshot::default()));
        let (logs_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            snapshot_tx,
            logs_tx,
            policy,
        }
    }

    /// Merge a partial update through the anti-rollback policy.
    ///
    /// Returns `true` if the update was accepted and a new snapshot was
    /// published. Rejected updates leave the snapshot untouched and wake
    /// no subscriber.
    pub fn apply_update(&self, update: &ProgressUpdate) -> bool {
        let policy = self.policy;
        self.snapshot_tx.send_if_modified(|current| {
            match merge_update(&**current, update, policy) {
                MergeOutcome::Applied(merge) => {
                    if !merge.ignored_keys.is_empty() {
                        tracing::debug!(keys = ?merge.ignored_keys, "Ignoring unknown progress keys");
                    }
                    if !merge.held_terminal.is_empty() {
                        tracing::debug!(
                            stages = ?merge.held_terminal,
                            "Ignoring non-terminal update for finished stages",
                        );
                    }
                    *current = Arc::new(merge.snapshot);
                    true
                }
                MergeOutcome::Rejected(rejection) => {
                    tracing::debug!(
                        current = rejection.current_overall,
                        candidate = rejection.candidate_overall,
                        "Rejected stale progress update",
                    );
                    false
                }
            }
        })
    }

    /// Append a log line.
    pub fn add_log(&self, entry: LogEntry) {
        self.logs_tx.send_modify(|logs| Arc::make_mut(logs).push(entry));
    }

    /// Drop every log line.
    pub fn clear_logs(&self) {
        self.logs_tx.send_if_modified(|logs| {
            if logs.is_empty() {
                return false;
            }
            *logs = Arc::new(Vec::new());
            true
        });
    }

    /// Restore the default all-pending snapshot. Logs are kept; call
    /// [`clear_logs`](Self::clear_logs) separately if needed.
    pub fn reset(&self) {
        self.snapshot_tx
            .send_replace(Arc::new(JobProgressSnapshot::default()));
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SnapshotRef {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    /// The current log list.
    pub fn logs(&self) -> LogsRef {
        Arc::clone(&self.logs_tx.borrow())
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<SnapshotRef> {
        self.snapshot_tx.subscribe()
    }

    /// Subscribe to log list changes.
    pub fn subscribe_logs(&self) -> watch::Receiver<LogsRef> {
        self.logs_tx.subscribe()
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use stagewatch_core::log::LogLevel;
    use stagewatch_core::progress::{StageKey, StageStatus, StageUpdate};

    use super::*;

    #[test]
    fn new_store_holds_default_snapshot() {
        let store = ProgressStore::new();
        assert_eq!(*store.snapshot(), JobProgressSnapshot::default());
        assert!(store.logs().is_empty());
    }

    #[test]
    fn rejected_update_keeps_snapshot_pointer() {
        let store = ProgressStore::new();
        assert!(store.apply_update(&ProgressUpdate::overall(60.0)));
        let before = store.snapshot();

        assert!(!store.apply_update(&ProgressUpdate::overall(40.0)));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn reset_restores_default_but_keeps_logs() {
        let store = ProgressStore::new();
        store.apply_update(
            &ProgressUpdate::overall(90.0)
                .with_stage(StageKey::Upload, StageUpdate::new(StageStatus::InProgress, 50.0)),
        );
        store.add_log(LogEntry::now(LogLevel::Info, "uploading"));

        store.reset();

        assert_eq!(*store.snapshot(), JobProgressSnapshot::default());
        assert_eq!(store.logs().len(), 1);

        // After a reset a low value is no longer a regression.
        assert!(store.apply_update(&ProgressUpdate::overall(5.0)));
    }

    #[test]
    fn held_log_list_is_not_mutated_by_later_appends() {
        let store = ProgressStore::new();
        store.add_log(LogEntry::now(LogLevel::Info, "one"));
        let held = store.logs();

        store.add_log(LogEntry::now(LogLevel::Error, "two"));

        assert_eq!(held.len(), 1);
        assert_eq!(store.logs().len(), 2);
    }

    #[test]
    fn clear_logs_empties_list() {
        let store = ProgressStore::new();
        store.add_log(LogEntry::now(LogLevel::Warning, "slow"));
        store.clear_logs();
        assert!(store.logs().is_empty());
    }
}
