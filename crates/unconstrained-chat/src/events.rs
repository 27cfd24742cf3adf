//! Session event types

use serde::{Deserialize, Serialize};
use unconstrained_api::RunStatus;

use crate::conversation::TranscriptEntry;

/// Events emitted while a session runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// An assistant preset was resolved and selected
    AssistantSelected { preset: String, assistant_id: String },

    /// A file was accepted; `file_id` is set when it was stored remotely
    FileAttached {
        file_name: String,
        file_id: Option<String>,
    },

    /// The user's prompt was added to the thread
    UserMessage { entry: TranscriptEntry },

    /// A run was started (or restarted after a failure)
    RunCreated { run_id: String },

    /// The run is queued or in progress
    Working { status: RunStatus },

    /// The run failed and a replacement will be started
    Retrying { attempt: u32, ceiling: u32 },

    /// The run is in a state outside the normal progression
    Waiting { status: RunStatus },

    /// The run finished; the full transcript is attached
    Completed {
        transcript: Vec<TranscriptEntry>,
        partial: bool,
    },

    /// Retries were exhausted
    Failed { message: String },

    /// Polling stopped without the run settling
    Stalled { status: RunStatus },

    /// The turn was cancelled
    Cancelled,

    /// Error occurred
    Error { message: String },
}

impl ChatEvent {
    /// Check if this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::Completed { .. }
                | ChatEvent::Failed { .. }
                | ChatEvent::Stalled { .. }
                | ChatEvent::Cancelled
                | ChatEvent::Error { .. }
        )
    }
}
