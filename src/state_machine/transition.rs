//! Pure state transition function

use super::{Effect, Event, ThreadContext, ThreadState};
use crate::checkpoint::{PendingAction, ThreadMessage, ToolCallRequest};
use crate::llm::LlmResponse;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Corrective re-prompts allowed per turn before giving up
pub const MAX_NUDGES: u32 = 3;

/// Injected when the model returns neither text nor a tool request
pub const NUDGE_PROMPT: &str = "Respond with a real output.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ThreadState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ThreadState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Thread is busy processing the previous message")]
    Busy,
    #[error("A confirmation is pending; resolve it before sending new messages")]
    ConfirmationPending,
    #[error("Model produced no usable output after {attempts} attempts")]
    ModelUnresponsive { attempts: u32 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same state, context, and event this always produces the
/// same new state and effect list, with no I/O. All side effects are
/// described by the returned effects and executed by the runtime.
pub fn transition(
    state: &ThreadState,
    context: &ThreadContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User message handling
        // ============================================================

        // Idle or Error + UserMessage -> AssistantRequesting
        (ThreadState::Idle | ThreadState::Error { .. }, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            })
            .with_effect(Effect::persist_message(ThreadMessage::user(text)))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::RequestModel))
        }

        // A paused confirmation must be decided before the thread moves on
        (ThreadState::AwaitingConfirmation { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::ConfirmationPending)
        }

        (
            ThreadState::AssistantRequesting { .. } | ThreadState::ToolExecuting { .. },
            Event::UserMessage { .. },
        ) => Err(TransitionError::Busy),

        // ============================================================
        // Model response processing
        // ============================================================

        (ThreadState::AssistantRequesting { nudges, .. }, Event::ModelResponse { content }) => {
            let response = LlmResponse { content };

            if response.lacks_usable_output() {
                // Bounded corrective re-prompt for empty responses
                if *nudges >= MAX_NUDGES {
                    return Err(TransitionError::ModelUnresponsive {
                        attempts: nudges + 1,
                    });
                }
                return Ok(TransitionResult::new(ThreadState::AssistantRequesting {
                    attempt: 1,
                    nudges: nudges + 1,
                })
                .with_effect(Effect::persist_message(ThreadMessage::user(NUDGE_PROMPT)))
                .with_effect(Effect::PersistState)
                .with_effect(Effect::RequestModel));
            }

            let tool_calls: Vec<ToolCallRequest> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: input.clone(),
                })
                .collect();

            let text = response.text();
            let text = (!text.trim().is_empty()).then_some(text);
            let assistant_message = ThreadMessage::assistant(text, tool_calls.clone());

            if tool_calls.is_empty() {
                // Text-only response ends the turn
                Ok(TransitionResult::new(ThreadState::Idle)
                    .with_effect(Effect::persist_message(assistant_message))
                    .with_effect(Effect::PersistState))
            } else {
                let (new_state, effects) = dispatch_next(context, tool_calls);
                Ok(TransitionResult::new(new_state)
                    .with_effect(Effect::persist_message(assistant_message))
                    .with_effects(effects))
            }
        }

        // ============================================================
        // Model errors and retry
        // ============================================================

        // Retryable error with attempts left -> schedule a retry
        (
            ThreadState::AssistantRequesting { attempt, nudges },
            Event::ModelError { kind, .. },
        ) if kind.is_retryable() && *attempt < MAX_RETRY_ATTEMPTS => {
            let new_attempt = attempt + 1;
            Ok(TransitionResult::new(ThreadState::AssistantRequesting {
                attempt: new_attempt,
                nudges: *nudges,
            })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::ScheduleRetry {
                delay: retry_delay(new_attempt),
                attempt: new_attempt,
            }))
        }

        // Non-retryable or exhausted -> Error
        (
            ThreadState::AssistantRequesting { attempt, .. },
            Event::ModelError { message, kind, .. },
        ) => {
            let message = if kind.is_retryable() {
                format!("Model request failed after {attempt} attempts: {message}")
            } else {
                message
            };
            Ok(TransitionResult::new(ThreadState::Error { message })
                .with_effect(Effect::PersistState))
        }

        // Stale timers for superseded attempts are dropped by the guard
        (
            ThreadState::AssistantRequesting { attempt, nudges },
            Event::RetryTimeout {
                attempt: retry_attempt,
            },
        ) if *attempt == retry_attempt => Ok(TransitionResult::new(
            ThreadState::AssistantRequesting {
                attempt: *attempt,
                nudges: *nudges,
            },
        )
        .with_effect(Effect::RequestModel)),

        // ============================================================
        // Tool execution
        // ============================================================

        (
            ThreadState::ToolExecuting { current, remaining },
            Event::ToolComplete {
                request_id,
                output,
                is_error,
            },
        ) if request_id == current.id => {
            let tool_message = ThreadMessage::tool(&current.id, output, is_error);
            let (new_state, effects) = dispatch_next(context, remaining.clone());
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::persist_message(tool_message))
                .with_effects(effects))
        }

        // ============================================================
        // Confirmation resolution
        // ============================================================

        (
            ThreadState::AwaitingConfirmation { action, remaining },
            Event::ActionResolved {
                action_id,
                approved,
                feedback,
            },
        ) if action_id == action.id => {
            if approved {
                Ok(TransitionResult::new(ThreadState::ToolExecuting {
                    current: action.clone(),
                    remaining: remaining.clone(),
                })
                .with_effect(Effect::MarkActionResolved {
                    action_id: action.id.clone(),
                })
                .with_effect(Effect::PersistState)
                .with_effect(Effect::execute_tool(action.clone())))
            } else {
                // A denial answers the tool request with a synthesized
                // result so the model can adjust course
                let tool_message =
                    ThreadMessage::tool(&action.id, denial_message(feedback.as_deref()), true);
                let (new_state, effects) = dispatch_next(context, remaining.clone());
                Ok(TransitionResult::new(new_state)
                    .with_effect(Effect::MarkActionResolved {
                        action_id: action.id.clone(),
                    })
                    .with_effect(Effect::persist_message(tool_message))
                    .with_effects(effects))
            }
        }

        // ============================================================
        // Invalid transitions
        // ============================================================

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} with event {event:?}"
        ))),
    }
}

/// Route the next queued tool request, or go back to the model when
/// the queue is drained. Sensitive tools pause for confirmation.
fn dispatch_next(
    context: &ThreadContext,
    mut queue: Vec<ToolCallRequest>,
) -> (ThreadState, Vec<Effect>) {
    if queue.is_empty() {
        return (
            ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            vec![Effect::PersistState, Effect::RequestModel],
        );
    }
    let next = queue.remove(0);
    if context.is_sensitive(&next.name) {
        let action = PendingAction::from_request(&next);
        (
            ThreadState::AwaitingConfirmation {
                action: next,
                remaining: queue,
            },
            vec![
                Effect::PushPendingAction {
                    action: action.clone(),
                },
                Effect::PersistState,
                Effect::SurfaceConfirmation { action },
            ],
        )
    } else {
        (
            ThreadState::ToolExecuting {
                current: next.clone(),
                remaining: queue,
            },
            vec![Effect::PersistState, Effect::execute_tool(next)],
        )
    }
}

fn denial_message(feedback: Option<&str>) -> String {
    match feedback {
        Some(reason) if !reason.trim().is_empty() => {
            format!("Action denied by user. Reason: {reason}")
        }
        _ => "Action denied by user.".to_string(),
    }
}

fn retry_delay(attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s, 4s
    Duration::from_secs(1 << (attempt - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Role;
    use crate::llm::{ContentBlock, LlmErrorKind};
    use serde_json::json;
    use std::collections::HashSet;

    fn test_context() -> ThreadContext {
        let sensitive: HashSet<String> = ["cancel_ticket", "book_hotel"]
            .iter()
            .map(ToString::to_string)
            .collect();
        ThreadContext::new("test-thread", Some("P100".to_string()), sensitive)
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    fn persisted_roles(effects: &[Effect]) -> Vec<Role> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::PersistMessage { message } => Some(message.role),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn user_message_starts_a_model_request() {
        let result = transition(
            &ThreadState::Idle,
            &test_context(),
            Event::UserMessage {
                text: "hello".to_string(),
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0
            }
        ));
        assert_eq!(persisted_roles(&result.effects), vec![Role::User]);
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel)));
    }

    #[test]
    fn error_state_recovers_on_user_message() {
        let result = transition(
            &ThreadState::Error {
                message: "previous failure".to_string(),
            },
            &test_context(),
            Event::UserMessage {
                text: "try again".to_string(),
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting { .. }
        ));
    }

    #[test]
    fn busy_thread_rejects_user_message() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::UserMessage {
                text: "hello".to_string(),
            },
        );
        assert!(matches!(result, Err(TransitionError::Busy)));
    }

    #[test]
    fn pending_confirmation_blocks_user_message() {
        let result = transition(
            &ThreadState::AwaitingConfirmation {
                action: call("a1", "cancel_ticket"),
                remaining: vec![],
            },
            &test_context(),
            Event::UserMessage {
                text: "hello".to_string(),
            },
        );
        assert!(matches!(result, Err(TransitionError::ConfirmationPending)));
    }

    #[test]
    fn text_response_ends_the_turn() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelResponse {
                content: vec![ContentBlock::text("Here are your options.")],
            },
        )
        .unwrap();

        assert!(matches!(result.new_state, ThreadState::Idle));
        assert_eq!(persisted_roles(&result.effects), vec![Role::Assistant]);
    }

    #[test]
    fn empty_response_injects_a_corrective_prompt() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelResponse { content: vec![] },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 1
            }
        ));
        let corrective = result.effects.iter().find_map(|e| match e {
            Effect::PersistMessage { message } => message.content.clone(),
            _ => None,
        });
        assert_eq!(corrective.as_deref(), Some(NUDGE_PROMPT));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel)));
    }

    #[test]
    fn whitespace_only_text_counts_as_empty() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelResponse {
                content: vec![ContentBlock::text("   \n")],
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting { nudges: 1, .. }
        ));
    }

    #[test]
    fn nudges_are_bounded() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: MAX_NUDGES,
            },
            &test_context(),
            Event::ModelResponse { content: vec![] },
        );

        assert!(matches!(
            result,
            Err(TransitionError::ModelUnresponsive { attempts: 4 })
        ));
    }

    #[test]
    fn safe_tool_request_executes_immediately() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelResponse {
                content: vec![ContentBlock::tool_use(
                    "c1",
                    "search_hotels",
                    json!({"location": "Basel"}),
                )],
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::ToolExecuting { ref current, .. } if current.id == "c1"
        ));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ExecuteTool { request } if request.name == "search_hotels")));
    }

    #[test]
    fn sensitive_tool_request_pauses_for_confirmation() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelResponse {
                content: vec![ContentBlock::tool_use(
                    "c1",
                    "cancel_ticket",
                    json!({"ticket_no": "0001"}),
                )],
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AwaitingConfirmation { ref action, .. } if action.id == "c1"
        ));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::PushPendingAction { .. })));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::SurfaceConfirmation { .. })));
        assert!(!result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ExecuteTool { .. })));
    }

    #[test]
    fn tool_complete_advances_the_queue() {
        let result = transition(
            &ThreadState::ToolExecuting {
                current: call("c1", "search_hotels"),
                remaining: vec![call("c2", "search_car_rentals")],
            },
            &test_context(),
            Event::ToolComplete {
                request_id: "c1".to_string(),
                output: "[]".to_string(),
                is_error: false,
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::ToolExecuting { ref current, .. } if current.id == "c2"
        ));
        assert_eq!(persisted_roles(&result.effects), vec![Role::Tool]);
    }

    #[test]
    fn last_tool_complete_returns_to_the_model() {
        let result = transition(
            &ThreadState::ToolExecuting {
                current: call("c1", "search_hotels"),
                remaining: vec![],
            },
            &test_context(),
            Event::ToolComplete {
                request_id: "c1".to_string(),
                output: "[]".to_string(),
                is_error: false,
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting { .. }
        ));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel)));
    }

    #[test]
    fn mid_queue_sensitive_tool_pauses_after_safe_one() {
        let result = transition(
            &ThreadState::ToolExecuting {
                current: call("c1", "search_hotels"),
                remaining: vec![call("c2", "book_hotel")],
            },
            &test_context(),
            Event::ToolComplete {
                request_id: "c1".to_string(),
                output: "[]".to_string(),
                is_error: false,
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AwaitingConfirmation { ref action, .. } if action.id == "c2"
        ));
    }

    #[test]
    fn approved_action_executes() {
        let result = transition(
            &ThreadState::AwaitingConfirmation {
                action: call("a1", "cancel_ticket"),
                remaining: vec![],
            },
            &test_context(),
            Event::ActionResolved {
                action_id: "a1".to_string(),
                approved: true,
                feedback: None,
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::ToolExecuting { ref current, .. } if current.id == "a1"
        ));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::MarkActionResolved { action_id } if action_id == "a1")));
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ExecuteTool { .. })));
    }

    #[test]
    fn denied_action_synthesizes_a_tool_result() {
        let result = transition(
            &ThreadState::AwaitingConfirmation {
                action: call("a1", "cancel_ticket"),
                remaining: vec![],
            },
            &test_context(),
            Event::ActionResolved {
                action_id: "a1".to_string(),
                approved: false,
                feedback: Some("keep the booking".to_string()),
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting { .. }
        ));
        let denial = result.effects.iter().find_map(|e| match e {
            Effect::PersistMessage { message } => Some(message.clone()),
            _ => None,
        });
        let denial = denial.unwrap();
        assert_eq!(denial.role, Role::Tool);
        assert_eq!(denial.tool_call_id.as_deref(), Some("a1"));
        assert_eq!(
            denial.content.as_deref(),
            Some("Action denied by user. Reason: keep the booking")
        );
        assert!(result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestModel)));
    }

    #[test]
    fn denied_action_without_feedback_uses_default_phrase() {
        let result = transition(
            &ThreadState::AwaitingConfirmation {
                action: call("a1", "book_hotel"),
                remaining: vec![],
            },
            &test_context(),
            Event::ActionResolved {
                action_id: "a1".to_string(),
                approved: false,
                feedback: None,
            },
        )
        .unwrap();

        let denial = result.effects.iter().find_map(|e| match e {
            Effect::PersistMessage { message } => message.content.clone(),
            _ => None,
        });
        assert_eq!(denial.as_deref(), Some("Action denied by user."));
    }

    #[test]
    fn retryable_error_schedules_backoff() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelError {
                message: "timeout".to_string(),
                kind: LlmErrorKind::Network,
                attempt: 1,
            },
        )
        .unwrap();

        assert!(matches!(
            result.new_state,
            ThreadState::AssistantRequesting { attempt: 2, .. }
        ));
        assert!(result.effects.iter().any(|e| matches!(
            e,
            Effect::ScheduleRetry {
                delay,
                attempt: 2
            } if *delay == Duration::from_secs(2)
        )));
    }

    #[test]
    fn exhausted_retries_land_in_error_state() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: MAX_RETRY_ATTEMPTS,
                nudges: 0,
            },
            &test_context(),
            Event::ModelError {
                message: "timeout".to_string(),
                kind: LlmErrorKind::Network,
                attempt: MAX_RETRY_ATTEMPTS,
            },
        )
        .unwrap();

        assert!(matches!(result.new_state, ThreadState::Error { .. }));
    }

    #[test]
    fn non_retryable_error_fails_immediately() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 1,
                nudges: 0,
            },
            &test_context(),
            Event::ModelError {
                message: "bad key".to_string(),
                kind: LlmErrorKind::Auth,
                attempt: 1,
            },
        )
        .unwrap();

        assert!(
            matches!(result.new_state, ThreadState::Error { ref message } if message == "bad key")
        );
    }

    #[test]
    fn stale_retry_timer_is_rejected() {
        let result = transition(
            &ThreadState::AssistantRequesting {
                attempt: 2,
                nudges: 0,
            },
            &test_context(),
            Event::RetryTimeout { attempt: 1 },
        );
        assert!(matches!(result, Err(TransitionError::InvalidTransition(_))));
    }
}
