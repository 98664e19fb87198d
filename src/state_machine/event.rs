//! Events that can occur on a thread

use crate::llm::{ContentBlock, LlmErrorKind};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },

    // Model events
    ModelResponse {
        content: Vec<ContentBlock>,
    },
    ModelError {
        message: String,
        kind: LlmErrorKind,
        attempt: u32,
    },
    RetryTimeout {
        attempt: u32,
    },

    // Tool events
    ToolComplete {
        request_id: String,
        output: String,
        is_error: bool,
    },

    // Confirmation events
    ActionResolved {
        action_id: String,
        approved: bool,
        feedback: Option<String>,
    },
}
