//! Error types for the dialogue layer.

use tutor_core::error::TutorError;

/// Errors raised by a generation provider adapter.
///
/// These never cross the answer engine boundary: the engine turns them into
/// fallback text or a terminating stream chunk.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected payload: {0}")]
    Payload(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            ProviderError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Errors from the dialogue session controller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("generation unavailable: {0}")]
    Unavailable(String),
    #[error("query cannot be empty")]
    EmptyQuery,
    #[error("query exceeds maximum length of {0} characters")]
    QueryTooLong(usize),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("session store error: {0}")]
    SessionStore(String),
}

impl ChatError {
    /// Whether the error was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::EmptyQuery | ChatError::QueryTooLong(_))
    }
}

impl From<ChatError> for TutorError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Unavailable(msg) => TutorError::Config(msg),
            ChatError::SessionStore(msg) => TutorError::Storage(msg),
            other => TutorError::Generation(other.to_string()),
        }
    }
}
