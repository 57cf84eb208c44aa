//! API request and response types

use serde::{Deserialize, Serialize};

/// Request to send a user message into a session
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub open_sessions: usize,
    /// Sessions started but not yet streaming
    pub pending_sessions: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
