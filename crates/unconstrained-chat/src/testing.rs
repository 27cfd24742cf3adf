//! Scripted in-memory assistants backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use unconstrained_api::{
    Assistant, AssistantsApi, CreateMessageRequest, CreateRunRequest, CreateThreadRequest,
    FileObject, FileUpload, MessageContent, Role, Run, RunStatus, TextContent, Thread,
    ThreadMessage,
};

use crate::{
    poller::PollConfig,
    presets::AssistantPreset,
    session::{ChatConfig, ChatSession},
};

/// Plays back a fixed sequence of run statuses.
///
/// Every `create_run` and `retrieve_run` pops the next status (defaulting to
/// `completed` once the script runs out). A run that reaches `completed`
/// appends the canned reply to the thread exactly once.
pub(crate) struct ScriptedApi {
    statuses: Mutex<VecDeque<RunStatus>>,
    messages: Mutex<Vec<ThreadMessage>>,
    replied_runs: Mutex<Vec<String>>,
    run_assistants: Mutex<HashMap<String, String>>,
    reply: String,
    next_id: AtomicU32,
    fail_once: Mutex<Option<&'static str>>,
    pub calls: Mutex<Vec<&'static str>>,
    pub created_messages: Mutex<Vec<CreateMessageRequest>>,
    pub created_runs: Mutex<Vec<CreateRunRequest>>,
    pub created_threads: Mutex<Vec<CreateThreadRequest>>,
    pub uploads: Mutex<Vec<FileUpload>>,
}

impl ScriptedApi {
    pub fn new(statuses: impl IntoIterator<Item = RunStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            messages: Mutex::new(Vec::new()),
            replied_runs: Mutex::new(Vec::new()),
            run_assistants: Mutex::new(HashMap::new()),
            reply: "Here is your summary.".to_string(),
            next_id: AtomicU32::new(1),
            fail_once: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            created_messages: Mutex::new(Vec::new()),
            created_runs: Mutex::new(Vec::new()),
            created_threads: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Every run completes on its first observation
    pub fn completing() -> Self {
        Self::new(Vec::<RunStatus>::new())
    }

    /// Make the next call with this name return a server error
    pub fn fail_next(&self, call: &'static str) {
        *self.fail_once.lock() = Some(call);
    }

    /// How many times a call was made
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) -> unconstrained_api::Result<()> {
        self.calls.lock().push(call);
        let mut fail = self.fail_once.lock();
        if *fail == Some(call) {
            *fail = None;
            return Err(unconstrained_api::Error::api(500, "server_error", "scripted failure"));
        }
        Ok(())
    }

    fn assistant_of(&self, run_id: &str) -> String {
        self.run_assistants
            .lock()
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn message(&self, thread_id: &str, role: Role, text: &str) -> ThreadMessage {
        let id = self.id("msg");
        ThreadMessage {
            created_at: self.messages.lock().len() as i64 + 1,
            id,
            thread_id: thread_id.to_string(),
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

    fn with_next_status(&self, mut run: Run) -> Run {
        run.status = self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(RunStatus::Completed);

        if run.status == RunStatus::Completed {
            let mut replied = self.replied_runs.lock();
            if !replied.contains(&run.id) {
                replied.push(run.id.clone());
                let reply = self.message(&run.thread_id, Role::Assistant, &self.reply);
                self.messages.lock().push(reply);
            }
        }
        run
    }
}

#[async_trait]
impl AssistantsApi for ScriptedApi {
    async fn retrieve_assistant(&self, assistant_id: &str) -> unconstrained_api::Result<Assistant> {
        self.record("retrieve_assistant")?;
        Ok(Assistant {
            id: assistant_id.to_string(),
            name: Some(format!("Assistant {}", assistant_id)),
            description: None,
            model: "gpt-4o".to_string(),
            instructions: None,
            created_at: 0,
        })
    }

    async fn create_thread(&self, request: CreateThreadRequest) -> unconstrained_api::Result<Thread> {
        self.record("create_thread")?;
        let thread = Thread {
            id: self.id("thread"),
            created_at: 0,
            metadata: request.metadata.clone(),
        };
        self.created_threads.lock().push(request);
        Ok(thread)
    }

    async fn create_message(
        &self,
        thread_id: &str,
        request: CreateMessageRequest,
    ) -> unconstrained_api::Result<ThreadMessage> {
        self.record("create_message")?;
        let message = self.message(thread_id, Role::User, &request.content);
        self.messages.lock().push(message.clone());
        self.created_messages.lock().push(request);
        Ok(message)
    }

    async fn list_messages(&self, _thread_id: &str) -> unconstrained_api::Result<Vec<ThreadMessage>> {
        self.record("list_messages")?;
        Ok(self.messages.lock().iter().rev().cloned().collect())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: CreateRunRequest,
    ) -> unconstrained_api::Result<Run> {
        self.record("create_run")?;
        let run = Run {
            id: self.id("run"),
            thread_id: thread_id.to_string(),
            assistant_id: request.assistant_id.clone(),
            status: RunStatus::Queued,
            created_at: 0,
            last_error: None,
        };
        self.run_assistants
            .lock()
            .insert(run.id.clone(), request.assistant_id.clone());
        self.created_runs.lock().push(request);
        Ok(self.with_next_status(run))
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> unconstrained_api::Result<Run> {
        self.record("retrieve_run")?;
        let run = Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            assistant_id: self.assistant_of(run_id),
            status: RunStatus::Queued,
            created_at: 0,
            last_error: None,
        };
        Ok(self.with_next_status(run))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> unconstrained_api::Result<Run> {
        self.record("cancel_run")?;
        Ok(Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            assistant_id: self.assistant_of(run_id),
            status: RunStatus::Cancelled,
            created_at: 0,
            last_error: None,
        })
    }

    async fn upload_file(&self, upload: FileUpload) -> unconstrained_api::Result<FileObject> {
        self.record("upload_file")?;
        let file = FileObject {
            id: self.id("file"),
            bytes: upload.bytes.len() as u64,
            filename: upload.file_name.clone(),
            purpose: upload.purpose.clone(),
            created_at: 0,
        };
        self.uploads.lock().push(upload);
        Ok(file)
    }
}

/// Session config with no waiting between polls
pub(crate) fn instant_config() -> ChatConfig {
    ChatConfig {
        polling: PollConfig {
            working_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..PollConfig::default()
        },
        ..ChatConfig::default()
    }
}

pub(crate) fn intervu() -> AssistantPreset {
    AssistantPreset {
        name: "InterVU".to_string(),
        id: Some("asst_intervu".to_string()),
        id_env: None,
    }
}

/// A session with the InterVU preset already selected
pub(crate) async fn ready_session(api: Arc<ScriptedApi>, config: ChatConfig) -> ChatSession {
    let mut session = ChatSession::new(config, api);
    session.select_assistant(&intervu()).await.unwrap();
    session
}
