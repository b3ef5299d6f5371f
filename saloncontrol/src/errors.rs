use crate::model::BackendKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Player request '{0}' failed: {1}")]
    PlayerRequest(String, String),
    #[error("Player request '{0}' returned HTTP status {1}")]
    PlayerHttpStatus(String, u16),
    #[error("Malformed response for '{0}': {1}")]
    MalformedResponse(String, String),
    #[error("Browser session error: {0}")]
    BrowserSession(String),
    #[error("Browser session is not connected")]
    BrowserNotConnected,
    #[error("Search request failed: {0}")]
    SearchRequest(String),
    #[error("Failed to start {0} backend: {1}")]
    BackendStart(BackendKind, String),
    #[error("Failed to pause {0} backend: {1}")]
    BackendPause(BackendKind, String),
}

impl ControlError {
    pub fn player_request(operation: &str, message: impl ToString) -> Self {
        ControlError::PlayerRequest(operation.to_string(), message.to_string())
    }

    pub fn browser_session(message: impl ToString) -> Self {
        ControlError::BrowserSession(message.to_string())
    }

    pub fn search_request(message: impl ToString) -> Self {
        ControlError::SearchRequest(message.to_string())
    }

    pub fn malformed_response(operation: &str, message: impl ToString) -> Self {
        ControlError::MalformedResponse(operation.to_string(), message.to_string())
    }
}
