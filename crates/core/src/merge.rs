//! Anti-rollback merge of partial progress updates.
//!
//! Transport ordering is not guaranteed across reconnects, so a late
//! frame can carry an older `overall` than what is already displayed.
//! [`merge_update`] rejects any update that would lower `overall` unless
//! it also reports a stage reaching `completed` or `failed`; terminal
//! reports are authoritative whatever their numbers say.
//!
//! Accepted updates are shallow-merged for scalar fields and deep-merged
//! per stage and per subtask. Only supplied keys and supplied fields are
//! touched.

use std::collections::BTreeMap;

use crate::progress::{
    JobProgressSnapshot, ProgressUpdate, StageKey, StageState, StageUpdate, SubtaskKey,
    SubtaskState, SubtaskUpdate,
};

/// Upper bound of every progress value.
pub const MAX_PROGRESS: f64 = 100.0;

// ---------------------------------------------------------------------------
// Policy and outcome
// ---------------------------------------------------------------------------

/// Tunables for [`merge_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// When set, a stage that reached `completed` or `failed` ignores
    /// later non-terminal updates for the rest of the job run.
    pub sticky_terminal: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            sticky_terminal: true,
        }
    }
}

/// Result of merging one update.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Applied(AppliedMerge),
    Rejected(Rejection),
}

/// An accepted update and the parts of it that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMerge {
    pub snapshot: JobProgressSnapshot,
    /// Keys this client does not know (e.g. `"publish"`,
    /// `"assets.music"`, `"render.subtasks"`).
    pub ignored_keys: Vec<String>,
    /// Terminal stages whose non-terminal update was held back.
    pub held_terminal: Vec<StageKey>,
}

/// An update dropped because it would lower `overall`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rejection {
    pub current_overall: f64,
    pub candidate_overall: f64,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `update` onto `current`, returning the new snapshot or the
/// reason the update was dropped. `current` is never modified.
pub fn merge_update(
    current: &JobProgressSnapshot,
    update: &ProgressUpdate,
    policy: MergePolicy,
) -> MergeOutcome {
    let candidate_overall = update
        .overall
        .and_then(clamp_progress)
        .unwrap_or(current.overall);

    if !update.has_status_change() && candidate_overall < current.overall {
        return MergeOutcome::Rejected(Rejection {
            current_overall: current.overall,
            candidate_overall,
        });
    }

    let mut next = current.clone();
    let mut ignored_keys = Vec::new();
    let mut held_terminal = Vec::new();

    next.overall = candidate_overall;
    if let Some(raw) = &update.stage {
        match raw.parse::<StageKey>() {
            Ok(key) => next.current_stage = key,
            Err(_) => ignored_keys.push(raw.clone()),
        }
    }
    if let Some(message) = &update.message {
        next.message.clone_from(message);
    }
    if let Some(eta) = &update.estimated_time_remaining {
        next.estimated_time_remaining = Some(eta.clone());
    }

    if let Some(stages) = &update.stages {
        for (raw_key, stage_update) in stages {
            let Ok(key) = raw_key.parse::<StageKey>() else {
                ignored_keys.push(raw_key.clone());
                continue;
            };
            let Some(stage) = next.stages.get_mut(&key) else {
                continue;
            };
            if policy.sticky_terminal && holds_terminal(stage, stage_update) {
                held_terminal.push(key);
                continue;
            }
            merge_stage(key, stage, stage_update, &mut ignored_keys);
        }
    }

    MergeOutcome::Applied(AppliedMerge {
        snapshot: next,
        ignored_keys,
        held_terminal,
    })
}

/// A terminal stage only accepts updates that keep it terminal.
fn holds_terminal(stage: &StageState, update: &StageUpdate) -> bool {
    stage.status.is_terminal() && !update.status.is_some_and(|s| s.is_terminal())
}

fn merge_stage(
    key: StageKey,
    stage: &mut StageState,
    update: &StageUpdate,
    ignored_keys: &mut Vec<String>,
) {
    if let Some(status) = update.status {
        stage.status = status;
    }
    if let Some(progress) = update.progress.and_then(clamp_progress) {
        stage.progress = progress;
    }

    let Some(subtask_updates) = &update.subtasks else {
        return;
    };
    if !key.has_subtasks() {
        ignored_keys.push(format!("{key}.subtasks"));
        return;
    }

    let subtasks = stage.subtasks.get_or_insert_with(BTreeMap::new);
    for (raw_key, sub_update) in subtask_updates {
        match raw_key.parse::<SubtaskKey>() {
            Ok(sub_key) => merge_subtask(subtasks.entry(sub_key).or_default(), sub_update),
            Err(_) => ignored_keys.push(format!("{key}.{raw_key}")),
        }
    }
}

fn merge_subtask(subtask: &mut SubtaskState, update: &SubtaskUpdate) {
    if let Some(status) = update.status {
        subtask.status = status;
    }
    if let Some(progress) = update.progress.and_then(clamp_progress) {
        subtask.progress = progress;
    }
    if let Some(total) = update.total {
        subtask.total = Some(total);
    }
}

/// Clamp into `0..=100`; non-finite values count as absent.
fn clamp_progress(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, MAX_PROGRESS))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
