//! Session state: thread, run, transcript and retry bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use unconstrained_api::{AttachmentTool, Role, Run, Thread, ThreadMessage};

use crate::poller::PollStep;

/// One rendered message in the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    /// Remote message id, when the entry mirrors a thread message
    pub message_id: Option<String>,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

impl TranscriptEntry {
    /// A user entry rendered locally right after submission
    pub fn user(text: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            message_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn from_message(message: ThreadMessage) -> Self {
        Self {
            role: message.role,
            text: message.text(),
            timestamp: message.created_at * 1000,
            message_id: Some(message.id),
        }
    }
}

/// Build a chronological transcript from a newest-first thread listing.
///
/// Only user and assistant messages are kept, and a message id appearing
/// twice (overlapping pages) is rendered once.
pub fn render_transcript(newest_first: Vec<ThreadMessage>) -> Vec<TranscriptEntry> {
    let mut seen = HashSet::new();
    newest_first
        .into_iter()
        .rev()
        .filter(|m| m.role.is_conversational())
        .filter(|m| seen.insert(m.id.clone()))
        .map(TranscriptEntry::from_message)
        .collect()
}

/// A remote file waiting to ride along with the next user message
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
    pub file_id: String,
    pub file_name: String,
    pub tool: AttachmentTool,
}

/// What the next poll must do before looking at the run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum NextAction {
    /// The tracked status is current
    #[default]
    Evaluate,
    /// Re-fetch the run
    Refresh,
    /// Start a replacement run on the same thread
    Resubmit,
}

/// Per-session conversation state
#[derive(Debug, Default)]
pub struct Conversation {
    /// Remote thread, created on the first prompt
    pub thread: Option<Thread>,
    /// The run currently tracked (at most one)
    pub run: Option<Run>,
    /// Rendered messages, chronological
    pub transcript: Vec<TranscriptEntry>,
    /// Failed-run observations in the current turn
    pub retry_count: u32,
    /// File to attach to the next message
    pub pending_file: Option<PendingFile>,
    /// Last error surfaced to the user
    pub error: Option<String>,
    pub(crate) next_action: NextAction,
    pub(crate) turn_started: Option<Instant>,
    pub(crate) polling: bool,
    /// Failed or stalled outcome of the last turn, replayed by later polls
    pub(crate) settled: Option<PollStep>,
}

impl Conversation {
    /// Whether a turn was started and its run has not settled yet
    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Whether a run is tracked and has not settled
    pub fn has_active_run(&self) -> bool {
        self.run.as_ref().is_some_and(|r| !r.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unconstrained_api::{MessageContent, TextContent};

    fn message(id: &str, role: Role, text: &str, created_at: i64) -> ThreadMessage {
        ThreadMessage {
            id: id.to_string(),
            created_at,
            thread_id: "thread_1".into(),
            role,
            content: vec![MessageContent::Text {
                text: TextContent {
                    value: text.to_string(),
                    annotations: vec![],
                },
            }],
            assistant_id: None,
            run_id: None,
            attachments: vec![],
        }
    }

    #[test]
    fn test_render_reverses_to_chronological() {
        let listing = vec![
            message("m3", Role::Assistant, "second answer", 3),
            message("m2", Role::User, "second question", 2),
            message("m1", Role::User, "first question", 1),
        ];
        let transcript = render_transcript(listing);
        let texts: Vec<&str> = transcript.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first question", "second question", "second answer"]);
        assert_eq!(transcript[0].timestamp, 1000);
    }

    #[test]
    fn test_render_drops_other_roles_and_duplicates() {
        let listing = vec![
            message("m2", Role::Assistant, "hi", 2),
            message("mx", Role::Other, "internal", 2),
            message("m2", Role::Assistant, "hi", 2),
            message("m1", Role::User, "hello", 1),
        ];
        let transcript = render_transcript(listing);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, Role::User);
        assert_eq!(transcript[1].role, Role::Assistant);
    }

    #[test]
    fn test_has_active_run() {
        let mut conversation = Conversation::default();
        assert!(!conversation.has_active_run());

        conversation.run = Some(Run {
            id: "run_1".into(),
            thread_id: "thread_1".into(),
            assistant_id: "asst_1".into(),
            status: unconstrained_api::RunStatus::Queued,
            created_at: 0,
            last_error: None,
        });
        assert!(conversation.has_active_run());

        if let Some(run) = conversation.run.as_mut() {
            run.status = unconstrained_api::RunStatus::Completed;
        }
        assert!(!conversation.has_active_run());
    }
}
