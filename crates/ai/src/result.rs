use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

impl EmailDraft {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The generator cannot run at all (e.g. missing API key). Not retried.
    #[error("generator not configured: {0}")]
    Configuration(String),

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("invalid generator response: {0}")]
    InvalidResponse(String),

    #[error("generation timed out")]
    Timeout,
}

impl GenerationError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, GenerationError::Configuration(_))
    }
}
