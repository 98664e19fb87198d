//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::checkpoint::{Role, ToolCallRequest};
use crate::llm::ContentBlock;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

const SAFE_TOOLS: &[&str] = &["search_flights", "search_hotels", "lookup_policy"];
const SENSITIVE_TOOLS: &[&str] = &["cancel_ticket", "book_hotel", "update_car_rental"];

fn test_context() -> ThreadContext {
    let sensitive: HashSet<String> = SENSITIVE_TOOLS.iter().map(ToString::to_string).collect();
    ThreadContext::new("prop-thread", Some("P100".to_string()), sensitive)
}

fn tool_messages(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::PersistMessage { message } if message.role == Role::Tool => {
                message.tool_call_id.clone()
            }
            _ => None,
        })
        .collect()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        proptest::sample::select(SAFE_TOOLS).prop_map(ToString::to_string),
        proptest::sample::select(SENSITIVE_TOOLS).prop_map(ToString::to_string),
    ]
}

fn arb_tool_batch() -> impl Strategy<Value = Vec<ToolCallRequest>> {
    proptest::collection::vec(arb_tool_name(), 1..6).prop_map(|names| {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ToolCallRequest {
                id: format!("call-{i}"),
                name,
                arguments: json!({}),
            })
            .collect()
    })
}

fn arb_call() -> impl Strategy<Value = ToolCallRequest> {
    ("[a-z]{8}", arb_tool_name()).prop_map(|(id, name)| ToolCallRequest {
        id,
        name,
        arguments: json!({}),
    })
}

fn arb_state() -> impl Strategy<Value = ThreadState> {
    prop_oneof![
        Just(ThreadState::Idle),
        (1u32..4, 0u32..4).prop_map(|(attempt, nudges)| ThreadState::AssistantRequesting {
            attempt,
            nudges
        }),
        (arb_call(), proptest::collection::vec(arb_call(), 0..3)).prop_map(
            |(current, remaining)| ThreadState::ToolExecuting { current, remaining }
        ),
        (arb_call(), proptest::collection::vec(arb_call(), 0..3)).prop_map(
            |(action, remaining)| ThreadState::AwaitingConfirmation { action, remaining }
        ),
        "[a-zA-Z ]{1,30}".prop_map(|message| ThreadState::Error { message }),
    ]
}

fn arb_busy_state() -> impl Strategy<Value = ThreadState> {
    prop_oneof![
        (1u32..4).prop_map(|attempt| ThreadState::AssistantRequesting { attempt, nudges: 0 }),
        (arb_call(), proptest::collection::vec(arb_call(), 0..3)).prop_map(
            |(current, remaining)| ThreadState::ToolExecuting { current, remaining }
        ),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Every requested tool call is answered exactly once, in request
    /// order, before control returns to the model. This holds for any
    /// mix of safe and sensitive tools and any approve/deny pattern.
    #[test]
    fn every_tool_call_answered_exactly_once(
        batch in arb_tool_batch(),
        decisions in proptest::collection::vec(any::<bool>(), 6),
    ) {
        let ctx = test_context();
        let mut decisions = decisions.into_iter();

        let result = transition(
            &ThreadState::Idle,
            &ctx,
            Event::UserMessage { text: "please handle my trip".to_string() },
        ).unwrap();

        let content: Vec<ContentBlock> = batch
            .iter()
            .map(|c| ContentBlock::tool_use(&c.id, &c.name, c.arguments.clone()))
            .collect();
        let mut result = transition(
            &result.new_state,
            &ctx,
            Event::ModelResponse { content },
        ).unwrap();

        let mut answered: Vec<String> = tool_messages(&result.effects);

        // Drive the machine until the queue drains
        loop {
            let event = match &result.new_state {
                ThreadState::ToolExecuting { current, .. } => Event::ToolComplete {
                    request_id: current.id.clone(),
                    output: "ok".to_string(),
                    is_error: false,
                },
                ThreadState::AwaitingConfirmation { action, .. } => Event::ActionResolved {
                    action_id: action.id.clone(),
                    approved: decisions.next().unwrap_or(true),
                    feedback: None,
                },
                ThreadState::AssistantRequesting { .. } => break,
                other => panic!("unexpected state while draining: {other:?}"),
            };
            result = transition(&result.new_state, &ctx, event).unwrap();
            answered.extend(tool_messages(&result.effects));
        }

        let expected: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        prop_assert_eq!(answered, expected);
    }

    /// Any persisted state survives a serialization round trip, so a
    /// paused thread can always be resumed from its checkpoint.
    #[test]
    fn state_serialization_round_trips(state in arb_state()) {
        let json = serde_json::to_string(&state).unwrap();
        let restored: ThreadState = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(state, restored);
    }

    /// Busy states never silently drop a user message
    #[test]
    fn busy_states_reject_user_messages(state in arb_busy_state(), text in "[a-zA-Z ]{1,30}") {
        let result = transition(&state, &test_context(), Event::UserMessage { text });
        prop_assert!(matches!(result, Err(TransitionError::Busy)));
    }

    /// A denial always answers the paused request with an error tool
    /// message carrying the action's own call id
    #[test]
    fn denial_answers_the_paused_request(
        action in arb_call(),
        remaining in proptest::collection::vec(arb_call(), 0..3),
        feedback in proptest::option::of("[a-zA-Z ]{1,20}"),
    ) {
        let action_id = action.id.clone();
        let result = transition(
            &ThreadState::AwaitingConfirmation { action, remaining },
            &test_context(),
            Event::ActionResolved {
                action_id: action_id.clone(),
                approved: false,
                feedback,
            },
        ).unwrap();

        let answered = tool_messages(&result.effects);
        prop_assert_eq!(answered, vec![action_id]);
    }

    /// Resolving with a mismatched action id never changes state
    #[test]
    fn mismatched_action_id_is_rejected(
        action in arb_call(),
        other_id in "[0-9]{6}",
        approved in any::<bool>(),
    ) {
        prop_assume!(action.id != other_id);
        let result = transition(
            &ThreadState::AwaitingConfirmation { action, remaining: vec![] },
            &test_context(),
            Event::ActionResolved { action_id: other_id, approved, feedback: None },
        );
        prop_assert!(matches!(result, Err(TransitionError::InvalidTransition(_))));
    }
}
