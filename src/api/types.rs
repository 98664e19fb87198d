//! API request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub passenger_id: Option<String>,
}

/// A sensitive action awaiting confirmation
#[derive(Debug, Serialize)]
pub struct ActionDetailsBody {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Response for a chat turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
    pub requires_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_details: Option<ActionDetailsBody>,
}

/// Request to approve or deny a paused action
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub thread_id: String,
    pub action_id: String,
    pub confirmed: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Envelope for a resolved confirmation
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub status: &'static str,
    pub result: ChatResponse,
}

impl ConfirmResponse {
    pub fn success(result: ChatResponse) -> Self {
        Self {
            status: "success",
            result,
        }
    }
}

/// Full thread snapshot for inspection
#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread: Value,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error: message.into(),
        }
    }
}
