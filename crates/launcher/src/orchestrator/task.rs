//! Per-install task state

use crate::game::GameId;
use crate::progress::{ProgressCallback, ProgressEvent};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Lifecycle of one fetch-and-install run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Created,
    Downloading,
    Downloaded,
    Extracting,
    Extracted,
    /// Archive deleted
    Cleaned,
    Complete,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }

    /// Forward by exactly one step, or to `Failed` from any non-terminal state
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Created, Downloading)
                | (Downloading, Downloaded)
                | (Downloaded, Extracting)
                | (Extracting, Extracted)
                | (Extracted, Cleaned)
                | (Cleaned, Complete)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One install run, owned by the orchestrator for the duration of the call
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub game_id: GameId,
    pub source_url: String,
    pub target_directory: PathBuf,
    pub archive_path: PathBuf,
    state: TaskState,
}

impl DownloadTask {
    pub fn new(game_id: GameId, source_url: String, target_directory: PathBuf, archive_path: PathBuf) -> Self {
        Self {
            game_id,
            source_url,
            target_directory,
            archive_path,
            state: TaskState::Created,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next` and announce it. Illegal transitions are logged and ignored.
    pub(crate) fn advance(&mut self, next: TaskState, progress: Option<&ProgressCallback>) -> bool {
        if !self.state.can_transition_to(next) {
            warn!("Ignoring illegal task transition {} -> {}", self.state, next);
            return false;
        }

        debug!("Task {}: {} -> {}", self.game_id, self.state, next);
        self.state = next;
        if let Some(callback) = progress {
            callback(ProgressEvent::TaskStateChanged {
                game_id: self.game_id.to_string(),
                state: next,
            });
        }
        true
    }
}
