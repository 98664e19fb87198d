//! Thread state types

use crate::checkpoint::ToolCallRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Position of a conversation thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[derive(Default)]
pub enum ThreadState {
    /// Ready for user input, no pending operations
    #[default]
    Idle,

    /// Model request in flight, with retry and re-prompt tracking
    AssistantRequesting {
        attempt: u32,
        /// Corrective re-prompts issued for empty responses this turn
        #[serde(default)]
        nudges: u32,
    },

    /// Executing tool requests serially
    ToolExecuting {
        current: ToolCallRequest,
        remaining: Vec<ToolCallRequest>,
    },

    /// A sensitive tool request is paused on an approve/deny decision.
    /// The thread stays resumable here indefinitely.
    AwaitingConfirmation {
        action: ToolCallRequest,
        remaining: Vec<ToolCallRequest>,
    },

    /// Error occurred; the next user message recovers the thread
    Error { message: String },
}

/// Immutable per-thread configuration for transitions
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub thread_id: String,
    pub passenger_id: Option<String>,
    /// Tool names that require confirmation before execution
    sensitive_tools: HashSet<String>,
}

impl ThreadContext {
    pub fn new(
        thread_id: impl Into<String>,
        passenger_id: Option<String>,
        sensitive_tools: HashSet<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            passenger_id,
            sensitive_tools,
        }
    }

    pub fn is_sensitive(&self, tool_name: &str) -> bool {
        self.sensitive_tools.contains(tool_name)
    }
}
