//! Job progress model: the displayed snapshot and the partial updates
//! merged into it.
//!
//! A job runs through five fixed pipeline stages. [`JobProgressSnapshot`]
//! is what the dashboard shows; [`ProgressUpdate`] is what the server
//! pushes. Updates keep stage and subtask keys as raw strings so that a
//! key this client does not know is skipped during merge instead of
//! failing the whole frame.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Stage keys
// ---------------------------------------------------------------------------

/// A pipeline stage. Variant order is pipeline order, so a
/// `BTreeMap<StageKey, _>` iterates in the order stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Script,
    Assets,
    Render,
    Thumbnail,
    Upload,
}

impl StageKey {
    /// Every stage, in pipeline order.
    pub const ALL: [StageKey; 5] = [
        StageKey::Script,
        StageKey::Assets,
        StageKey::Render,
        StageKey::Thumbnail,
        StageKey::Upload,
    ];

    /// Wire name of the stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Assets => "assets",
            Self::Render => "render",
            Self::Thumbnail => "thumbnail",
            Self::Upload => "upload",
        }
    }

    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Script => "Script",
            Self::Assets => "Assets",
            Self::Render => "Render",
            Self::Thumbnail => "Thumbnail",
            Self::Upload => "Upload",
        }
    }

    /// Whether this stage reports per-subtask progress.
    pub fn has_subtasks(self) -> bool {
        matches!(self, Self::Assets)
    }
}

impl FromStr for StageKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStage(s.to_string()))
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A countable or timed unit of work inside the `assets` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskKey {
    Audio,
    Images,
    Avatar,
}

impl SubtaskKey {
    pub const ALL: [SubtaskKey; 3] = [SubtaskKey::Audio, SubtaskKey::Images, SubtaskKey::Avatar];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Images => "images",
            Self::Avatar => "avatar",
        }
    }
}

impl FromStr for SubtaskKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| CoreError::UnknownSubtask(s.to_string()))
    }
}

impl fmt::Display for SubtaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of a stage or subtask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    /// `Completed` and `Failed` end a stage for the current job run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Per-subtask state inside the `assets` stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskState {
    pub status: StageStatus,
    pub progress: f64,
    /// Item count for countable subtasks (e.g. number of images).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// Per-stage state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    /// 0-100, meaningful while `status` is `InProgress`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<BTreeMap<SubtaskKey, SubtaskState>>,
}

impl StageState {
    /// Default state for a stage: pending, with every subtask pending for
    /// stages that carry subtasks.
    pub fn pending(key: StageKey) -> Self {
        let subtasks = key.has_subtasks().then(|| {
            SubtaskKey::ALL
                .into_iter()
                .map(|sub| (sub, SubtaskState::default()))
                .collect()
        });
        Self {
            status: StageStatus::Pending,
            progress: 0.0,
            subtasks,
        }
    }
}

/// The canonical progress shown for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressSnapshot {
    /// Overall completion, 0-100.
    pub overall: f64,
    #[serde(rename = "currentStageKey")]
    pub current_stage: StageKey,
    pub message: String,
    /// Always holds exactly the five pipeline stages.
    pub stages: BTreeMap<StageKey, StageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<String>,
}

impl Default for JobProgressSnapshot {
    fn default() -> Self {
        Self {
            overall: 0.0,
            current_stage: StageKey::Script,
            message: String::new(),
            stages: StageKey::ALL
                .into_iter()
                .map(|key| (key, StageState::pending(key)))
                .collect(),
            estimated_time_remaining: None,
        }
    }
}

impl JobProgressSnapshot {
    /// State of a single stage. Every key is present by construction.
    pub fn stage(&self, key: StageKey) -> Option<&StageState> {
        self.stages.get(&key)
    }

    /// True once every stage has completed.
    pub fn is_complete(&self) -> bool {
        self.stages
            .values()
            .all(|s| s.status == StageStatus::Completed)
    }

    /// True if any stage has failed.
    pub fn has_failure(&self) -> bool {
        self.stages.values().any(|s| s.status == StageStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// Partial updates (server -> client)
// ---------------------------------------------------------------------------

/// Partial update for one subtask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskUpdate {
    #[serde(default)]
    pub status: Option<StageStatus>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub total: Option<u32>,
}

/// Partial update for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    #[serde(default)]
    pub status: Option<StageStatus>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub subtasks: Option<BTreeMap<String, SubtaskUpdate>>,
}

/// A partial progress update as pushed by the server.
///
/// Every field is optional; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default)]
    pub overall: Option<f64>,
    /// Raw key of the stage now running.
    #[serde(default, alias = "currentStage", alias = "currentStageKey")]
    pub stage: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stages: Option<BTreeMap<String, StageUpdate>>,
    #[serde(default, alias = "estimated_time_remaining")]
    pub estimated_time_remaining: Option<String>,
}

impl ProgressUpdate {
    /// An update carrying only an overall value.
    pub fn overall(value: f64) -> Self {
        Self {
            overall: Some(value),
            ..Default::default()
        }
    }

    /// Add a stage entry, keyed by its wire name.
    pub fn with_stage(mut self, key: StageKey, update: StageUpdate) -> Self {
        self.stages
            .get_or_insert_with(BTreeMap::new)
            .insert(key.as_str().to_string(), update);
        self
    }

    /// Set the status line.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// True if any supplied stage reports `completed` or `failed`.
    ///
    /// Unknown stage keys count too: the flag describes what the server
    /// sent, not what this client can apply.
    pub fn has_status_change(&self) -> bool {
        self.stages.as_ref().is_some_and(|stages| {
            stages
                .values()
                .any(|s| s.status.is_some_and(StageStatus::is_terminal))
        })
    }
}

impl StageUpdate {
    /// A stage update with both status and progress set.
    pub fn new(status: StageStatus, progress: f64) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            subtasks: None,
        }
    }
}
