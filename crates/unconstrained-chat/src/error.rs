//! Error types for unconstrained-chat

use thiserror::Error;

use crate::upload::UploadError;

/// Result type alias using unconstrained-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the assistants API layer
    #[error(transparent)]
    Api(#[from] unconstrained_api::Error),

    /// An uploaded file could not be read or converted
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// A turn is already in flight for this session
    #[error("A reply is still being generated; wait for it or cancel it first")]
    Busy,

    /// Prompt submitted before any assistant was selected
    #[error("No assistant selected")]
    NoAssistant,

    /// Preset name not present in the configured list
    #[error("Unknown assistant: {0}")]
    UnknownPreset(String),

    /// Preset exists but no assistant id could be resolved for it
    #[error("Assistant '{name}' has no id configured: {detail}")]
    UnresolvedPreset { name: String, detail: String },
}

impl Error {
    /// Check if this error came from a file upload and the session can carry on
    pub fn is_upload(&self) -> bool {
        matches!(self, Error::Upload(_))
    }

    /// Check if retrying the same operation later might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api(e) => e.is_retryable(),
            Error::Busy => true,
            _ => false,
        }
    }
}
