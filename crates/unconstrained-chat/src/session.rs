//! The per-session chat context and its operations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use unconstrained_api::{
    Assistant, AssistantsApi, Attachment, AttachmentTool, CreateMessageRequest, CreateRunRequest,
    CreateThreadRequest, FileObject, FileUpload, Run, Thread,
};
use uuid::Uuid;

use crate::{
    conversation::{Conversation, NextAction, PendingFile, TranscriptEntry},
    error::{Error, Result},
    events::ChatEvent,
    handle::{BusyGuard, ChatHandle},
    poller::{self, PollConfig, PollStep},
    presets::AssistantPreset,
    upload::{FileKind, UploadedFile, normalize_tabular},
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Thread metadata key that carries the session id
    pub metadata_key: String,
    /// Purpose tag for stored files
    pub file_purpose: String,
    /// Store PDFs and images remotely instead of only acknowledging them
    pub upload_documents: bool,
    /// Polling behaviour
    pub polling: PollConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            metadata_key: "session_id".to_string(),
            file_purpose: "assistants".to_string(),
            upload_documents: false,
            polling: PollConfig::default(),
        }
    }
}

/// The assistant a session talks to
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedAssistant {
    pub preset: String,
    pub assistant: Assistant,
}

/// Result of attaching a file
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// A table converted to JSON and stored remotely
    Converted {
        json: String,
        rows: usize,
        columns: Vec<String>,
        file: FileObject,
    },
    /// A document or image stored remotely as-is
    Uploaded { kind: FileKind, file: FileObject },
    /// A document or image accepted locally only
    Displayed {
        kind: FileKind,
        file_name: String,
        bytes: usize,
    },
}

/// One user's chat session against a hosted assistant
pub struct ChatSession {
    pub(crate) config: ChatConfig,
    pub(crate) id: Uuid,
    pub(crate) api: Arc<dyn AssistantsApi>,
    pub(crate) assistant: Option<SelectedAssistant>,
    pub(crate) conversation: Conversation,
    pub(crate) event_tx: broadcast::Sender<ChatEvent>,
    pub(crate) handle: ChatHandle,
}

impl ChatSession {
    /// Create a new session
    pub fn new(config: ChatConfig, api: Arc<dyn AssistantsApi>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let id = Uuid::new_v4();
        tracing::debug!("New session {}", id);
        Self {
            config,
            id,
            api,
            assistant: None,
            conversation: Conversation::default(),
            event_tx,
            handle: ChatHandle::new(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for cancelling or checking the busy state
    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> &Conversation {
        &self.conversation
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.conversation.transcript
    }

    pub fn retry_count(&self) -> u32 {
        self.conversation.retry_count
    }

    pub fn assistant(&self) -> Option<&SelectedAssistant> {
        self.assistant.as_ref()
    }

    pub fn thread(&self) -> Option<&Thread> {
        self.conversation.thread.as_ref()
    }

    pub fn run(&self) -> Option<&Run> {
        self.conversation.run.as_ref()
    }

    pub fn pending_file(&self) -> Option<&PendingFile> {
        self.conversation.pending_file.as_ref()
    }

    /// Whether a turn is in flight
    pub fn is_busy(&self) -> bool {
        self.handle.is_busy()
    }

    /// Claim the session for one operation.
    ///
    /// Fails with `Busy` while another operation holds the handle, or while a
    /// run started by [`ChatSession::submit`] has not settled.
    fn ensure_idle(&self) -> Result<BusyGuard> {
        if self.conversation.polling {
            return Err(Error::Busy);
        }
        self.handle.try_begin().ok_or(Error::Busy)
    }

    /// Resolve a preset and make it the session's assistant
    pub async fn select_assistant(&mut self, preset: &AssistantPreset) -> Result<&SelectedAssistant> {
        let _guard = self.ensure_idle()?;

        let assistant_id = preset.resolve_id()?;
        let assistant = self.api.retrieve_assistant(&assistant_id).await?;
        tracing::info!("Selected assistant {} ({})", preset.name, assistant.id);

        let _ = self.event_tx.send(ChatEvent::AssistantSelected {
            preset: preset.name.clone(),
            assistant_id: assistant.id.clone(),
        });
        Ok(self.assistant.insert(SelectedAssistant {
            preset: preset.name.clone(),
            assistant,
        }))
    }

    /// Accept a user file.
    ///
    /// Tables are converted to JSON and stored remotely; documents and images
    /// are stored only when `upload_documents` is set. A stored file rides
    /// along with the next prompt, replacing any earlier pending file.
    pub async fn attach_file(&mut self, file: UploadedFile) -> Result<AttachOutcome> {
        let _guard = self.ensure_idle()?;

        let kind = file.kind()?;
        let outcome = match kind {
            FileKind::Tabular(format) => {
                let table = normalize_tabular(&file.name, &file.bytes, format)?;
                let stored = self
                    .api
                    .upload_file(FileUpload {
                        file_name: file.json_name(),
                        mime_type: "application/json".to_string(),
                        bytes: table.json.clone().into_bytes(),
                        purpose: self.config.file_purpose.clone(),
                    })
                    .await?;
                self.set_pending(&stored, &file.name, AttachmentTool::CodeInterpreter);
                AttachOutcome::Converted {
                    json: table.json,
                    rows: table.rows,
                    columns: table.columns,
                    file: stored,
                }
            }
            FileKind::Pdf | FileKind::Image if self.config.upload_documents => {
                let tool = if kind == FileKind::Pdf {
                    AttachmentTool::FileSearch
                } else {
                    AttachmentTool::CodeInterpreter
                };
                let mime_type = file.effective_mime_type();
                let stored = self
                    .api
                    .upload_file(FileUpload {
                        file_name: file.name.clone(),
                        mime_type,
                        bytes: file.bytes,
                        purpose: self.config.file_purpose.clone(),
                    })
                    .await?;
                self.set_pending(&stored, &file.name, tool);
                AttachOutcome::Uploaded { kind, file: stored }
            }
            FileKind::Pdf | FileKind::Image => {
                let _ = self.event_tx.send(ChatEvent::FileAttached {
                    file_name: file.name.clone(),
                    file_id: None,
                });
                AttachOutcome::Displayed {
                    kind,
                    bytes: file.bytes.len(),
                    file_name: file.name,
                }
            }
        };

        Ok(outcome)
    }

    fn set_pending(&mut self, stored: &FileObject, file_name: &str, tool: AttachmentTool) {
        if let Some(previous) = self.conversation.pending_file.as_ref() {
            tracing::debug!("Replacing pending file {}", previous.file_id);
        }
        self.conversation.pending_file = Some(PendingFile {
            file_id: stored.id.clone(),
            file_name: file_name.to_string(),
            tool,
        });
        let _ = self.event_tx.send(ChatEvent::FileAttached {
            file_name: file_name.to_string(),
            file_id: Some(stored.id.clone()),
        });
    }

    /// Submit a prompt and poll the resulting run until it settles
    pub async fn prompt(&mut self, text: &str) -> Result<PollStep> {
        let _guard = self.ensure_idle()?;
        let cancel = self.handle.reset_cancel();

        let result = match self.start_turn(text).await {
            Ok(()) => poller::poll_until_settled(self, &cancel).await,
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            self.conversation.polling = false;
            self.conversation.error = Some(e.to_string());
            let _ = self.event_tx.send(ChatEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    /// Start a turn without polling it; drive it with [`ChatSession::advance`]
    pub async fn submit(&mut self, text: &str) -> Result<()> {
        let _guard = self.ensure_idle()?;
        self.start_turn(text).await
    }

    /// Poll the tracked run once
    pub async fn advance(&mut self) -> Result<PollStep> {
        poller::advance(self).await
    }

    /// Add the user message to the thread and start a run
    async fn start_turn(&mut self, text: &str) -> Result<()> {
        let assistant_id = self
            .assistant
            .as_ref()
            .map(|a| a.assistant.id.clone())
            .ok_or(Error::NoAssistant)?;
        let thread_id = self.ensure_thread().await?;

        self.conversation.retry_count = 0;
        self.conversation.error = None;
        self.conversation.settled = None;
        self.conversation.turn_started = Some(Instant::now());

        let mut request = CreateMessageRequest::user(text);
        if let Some(file) = self.conversation.pending_file.take() {
            tracing::debug!("Attaching {} to the next message", file.file_id);
            request = request.with_attachment(Attachment {
                file_id: file.file_id,
                tools: vec![file.tool],
            });
        }

        let message = self.api.create_message(&thread_id, request).await?;
        let entry = TranscriptEntry::user(text, Some(message.id));
        self.conversation.transcript.push(entry.clone());
        let _ = self.event_tx.send(ChatEvent::UserMessage { entry });

        let run = self
            .api
            .create_run(&thread_id, CreateRunRequest { assistant_id })
            .await?;
        tracing::info!("Started run {} on {}", run.id, thread_id);
        let _ = self.event_tx.send(ChatEvent::RunCreated {
            run_id: run.id.clone(),
        });
        self.conversation.run = Some(run);
        self.conversation.next_action = NextAction::Evaluate;
        self.conversation.polling = true;
        Ok(())
    }

    /// Create the session's thread on first use; returns its id
    async fn ensure_thread(&mut self) -> Result<String> {
        if let Some(ref thread) = self.conversation.thread {
            return Ok(thread.id.clone());
        }

        let mut metadata = HashMap::new();
        metadata.insert(self.config.metadata_key.clone(), self.id.to_string());
        let thread = self
            .api
            .create_thread(CreateThreadRequest { metadata })
            .await?;
        tracing::info!("Created thread {} for session {}", thread.id, self.id);

        let id = thread.id.clone();
        self.conversation.thread = Some(thread);
        Ok(id)
    }
}
