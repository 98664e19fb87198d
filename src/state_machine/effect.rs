//! Effects produced by state transitions

use crate::checkpoint::{PendingAction, ThreadMessage, ToolCallRequest};
use std::time::Duration;

/// Effects to be executed after a state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append a message to the thread's log
    PersistMessage { message: ThreadMessage },

    /// Persist the new state
    PersistState,

    /// Make a model request
    RequestModel,

    /// Execute a tool request
    ExecuteTool { request: ToolCallRequest },

    /// Record a sensitive request as awaiting confirmation
    PushPendingAction { action: PendingAction },

    /// Mark a pending action as decided
    MarkActionResolved { action_id: String },

    /// Hand the pending action back to the caller for a decision
    SurfaceConfirmation { action: PendingAction },

    /// Schedule a retry of the model request
    ScheduleRetry { delay: Duration, attempt: u32 },
}

impl Effect {
    pub fn persist_message(message: ThreadMessage) -> Self {
        Effect::PersistMessage { message }
    }

    pub fn execute_tool(request: ToolCallRequest) -> Self {
        Effect::ExecuteTool { request }
    }
}
