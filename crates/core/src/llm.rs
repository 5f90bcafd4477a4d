use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::ChatMessage;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion transport failure: {0}")]
    Transport(String),
    #[error("completion service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response was malformed: {0}")]
    Malformed(String),
    #[error("completion request timed out after {0}s")]
    Timeout(u64),
}

/// Chat completion port. Takes the ordered transcript, returns one reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}
