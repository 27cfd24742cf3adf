//! Assistants API providers

pub mod openai;

use crate::{
    Assistant, CreateMessageRequest, CreateRunRequest, CreateThreadRequest, Error, FileObject,
    Result, Run, Thread, ThreadMessage,
};
use async_trait::async_trait;

/// Raw file contents to store on the remote service
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub purpose: String,
}

/// Operations the chat runtime needs from an assistants backend
#[async_trait]
pub trait AssistantsApi: Send + Sync {
    /// Fetch an assistant by id
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant>;

    /// Create a new conversation thread
    async fn create_thread(&self, request: CreateThreadRequest) -> Result<Thread>;

    /// Append a message to a thread
    async fn create_message(
        &self,
        thread_id: &str,
        request: CreateMessageRequest,
    ) -> Result<ThreadMessage>;

    /// List every message in a thread, newest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;

    /// Start a run of an assistant on a thread
    async fn create_run(&self, thread_id: &str, request: CreateRunRequest) -> Result<Run>;

    /// Re-fetch a run
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Ask the service to stop a run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Store a file for use by assistants
    async fn upload_file(&self, upload: FileUpload) -> Result<FileObject>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
