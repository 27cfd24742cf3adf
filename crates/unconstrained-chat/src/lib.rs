//! unconstrained-chat: Chat session runtime with run polling
//!
//! A [`ChatSession`] holds one user's conversation with a hosted assistant:
//! the selected assistant, the remote thread, the run in flight and the
//! rendered transcript. Prompts start a run that the poller drives to
//! completion, retrying failed runs up to a fixed ceiling.

pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod poller;
pub mod presets;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::{Conversation, PendingFile, TranscriptEntry};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use handle::{BusyGuard, ChatHandle};
pub use poller::{OVERLOAD_MESSAGE, PollConfig, PollStep};
pub use presets::{AssistantPreset, default_presets, find_preset};
pub use session::{AttachOutcome, ChatConfig, ChatSession, SelectedAssistant};
pub use upload::{FileKind, NormalizedTable, TabularFormat, UploadError, UploadedFile};
