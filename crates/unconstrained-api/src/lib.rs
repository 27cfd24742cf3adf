//! unconstrained-api: Typed client for the hosted assistants API
//!
//! This crate covers the slice of the assistants API the chat runtime uses:
//! assistants, threads, messages, runs and file uploads.

pub mod error;
pub mod providers;
pub mod types;

pub use error::{Error, Result};
pub use providers::{AssistantsApi, FileUpload, openai::OpenAIProvider};
pub use types::*;
