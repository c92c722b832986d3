//! Plain-text rendering of progress views.
//!
//! String building only; the binary decides when to print.

use std::sync::Arc;

use stagewatch_client::{LinkStatus, ProgressView};
use stagewatch_events::{LogsRef, SnapshotRef};
use stagewatch_core::log::LogEntry;
use stagewatch_core::progress::{JobProgressSnapshot, StageKey, StageState, StageStatus};

/// Width of the stage label column.
const LABEL_WIDTH: usize = 10;

pub fn status_glyph(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "[ ]",
        StageStatus::InProgress => "[~]",
        StageStatus::Completed => "[x]",
        StageStatus::Failed => "[!]",
    }
}

/// Headline: overall percentage, current stage, message and ETA.
pub fn render_overall(snapshot: &JobProgressSnapshot) -> String {
    let mut line = format!(
        "{:>3.0}% | {}",
        snapshot.overall,
        snapshot.current_stage.label()
    );
    if !snapshot.message.is_empty() {
        line.push_str(" | ");
        line.push_str(&snapshot.message);
    }
    if let Some(eta) = &snapshot.estimated_time_remaining {
        line.push_str(" | ETA ");
        line.push_str(eta);
    }
    line
}

/// One row for a stage, followed by one indented row per subtask.
pub fn render_stage(key: StageKey, stage: &StageState) -> Vec<String> {
    let mut rows = vec![format!(
        "  {} {:<width$} {:>3.0}%  {}",
        status_glyph(stage.status),
        key.label(),
        stage.progress,
        stage.status.label(),
        width = LABEL_WIDTH,
    )];
    if let Some(subtasks) = &stage.subtasks {
        for (subtask, state) in subtasks {
            let mut row = format!(
                "      {} {:<8} {:>3.0}%",
                status_glyph(state.status),
                subtask.as_str(),
                state.progress,
            );
            if let Some(total) = state.total {
                row.push_str(&format!(" of {total}"));
            }
            rows.push(row);
        }
    }
    rows
}

/// Headline plus every stage in pipeline order.
pub fn render_snapshot(snapshot: &JobProgressSnapshot) -> Vec<String> {
    let mut lines = vec![render_overall(snapshot)];
    for (key, stage) in &snapshot.stages {
        lines.extend(render_stage(*key, stage));
    }
    lines
}

/// `[timestamp] LEVEL message`
pub fn render_log(entry: &LogEntry) -> String {
    format!(
        "[{}] {:<5} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.level.label(),
        entry.message
    )
}

pub fn render_link(link: LinkStatus) -> &'static str {
    match link {
        LinkStatus::Connecting => "connecting",
        LinkStatus::Connected => "connected",
        LinkStatus::Reconnecting => "reconnecting…",
        LinkStatus::Closed => "closed",
    }
}

/// Turns successive views into the lines that changed since the last one.
#[derive(Debug, Default)]
pub struct ViewDiff {
    last_link: Option<LinkStatus>,
    last_snapshot: Option<SnapshotRef>,
    last_logs: Option<LogsRef>,
}

impl ViewDiff {
    pub fn lines(&mut self, view: &ProgressView) -> Vec<String> {
        let mut out = Vec::new();

        if self.last_link != Some(view.link) {
            out.push(format!("-- {}", render_link(view.link)));
            self.last_link = Some(view.link);
        }

        let snapshot_changed = match &self.last_snapshot {
            Some(prev) => !Arc::ptr_eq(prev, &view.snapshot) && **prev != *view.snapshot,
            None => true,
        };
        if snapshot_changed {
            out.extend(render_snapshot(&view.snapshot));
            self.last_snapshot = Some(Arc::clone(&view.snapshot));
        }

        let start = self
            .last_logs
            .as_ref()
            .map_or(0, |prev| continued_from(prev, &view.logs));
        out.extend(view.logs[start..].iter().map(render_log));
        self.last_logs = Some(Arc::clone(&view.logs));

        out
    }
}

/// Index of the first entry in `next` not already printed from `prev`.
///
/// Zero when `next` does not extend `prev`, i.e. the logs were cleared in
/// between, however many entries arrived afterwards.
fn continued_from(prev: &LogsRef, next: &LogsRef) -> usize {
    if Arc::ptr_eq(prev, next) {
        return next.len();
    }
    if next.len() >= prev.len() && next[..prev.len()] == prev[..] {
        prev.len()
    } else {
        0
    }
}
