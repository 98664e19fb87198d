//! Thread runtime
//!
//! Drives the pure state machine against real I/O: checkpoint writes,
//! model requests, and tool execution. Each chat or confirmation call
//! locks its thread, replays events until the machine reaches a
//! resting state (idle, awaiting confirmation, or error), and returns
//! the outcome. Distinct threads run fully in parallel.

use crate::booking::{time::Clock, BookingEngine};
use crate::checkpoint::{CheckpointError, CheckpointStore, PendingAction, Role};
use crate::llm::{ContentBlock, LlmClient, LlmMessage, LlmRequest};
use crate::state_machine::{transition, Effect, Event, ThreadContext, ThreadState, TransitionError};
use crate::system_prompt::build_system_prompt;
use crate::tools::{PolicyService, ToolContext, ToolRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;

/// Fallback text when a turn pauses with no accompanying prose
const CONFIRMATION_NOTICE: &str =
    "This action requires your confirmation before I can proceed.";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action already resolved: {0}")]
    AlreadyResolved(String),
    #[error("model request failed: {message}")]
    Model { message: String },
    #[error("persistence failure: {0}")]
    Persistence(CheckpointError),
}

impl From<CheckpointError> for RuntimeError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::UnknownAction(id) => RuntimeError::UnknownAction(id),
            CheckpointError::AlreadyResolved(id) => RuntimeError::AlreadyResolved(id),
            other => RuntimeError::Persistence(other),
        }
    }
}

/// Input for one chat turn
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub thread_id: Option<String>,
    pub passenger_id: Option<String>,
}

/// A sensitive action surfaced for confirmation
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionDetails {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Outcome of a chat or confirmation call
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub thread_id: String,
    pub response: String,
    pub requires_confirmation: bool,
    pub action: Option<ActionDetails>,
}

/// Shared service wiring plus the per-thread lock registry
pub struct RuntimeManager {
    checkpoints: CheckpointStore,
    engine: Arc<BookingEngine>,
    policy: Arc<PolicyService>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    thread_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl RuntimeManager {
    pub fn new(
        checkpoints: CheckpointStore,
        engine: Arc<BookingEngine>,
        policy: Arc<PolicyService>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            checkpoints,
            engine,
            policy,
            tools,
            llm,
            clock,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one user message, creating the thread if needed
    pub async fn chat(&self, input: ChatInput) -> Result<ChatOutcome, RuntimeError> {
        let thread_id = input
            .thread_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let lock = self.thread_lock(&thread_id).await;
        let _guard = lock.lock().await;

        let mut driver = self
            .load_driver(&thread_id, input.passenger_id.as_deref())?;
        driver.drive(Event::UserMessage {
            text: input.message,
        })
        .await?;
        driver.into_outcome()
    }

    /// Apply an approve/deny decision to a paused sensitive action
    pub async fn resolve_action(
        &self,
        thread_id: &str,
        action_id: &str,
        confirmed: bool,
        feedback: Option<String>,
    ) -> Result<ChatOutcome, RuntimeError> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        // Gate first: unknown or already-decided actions fail before
        // any transition runs
        self.checkpoints.get_pending_action(thread_id, action_id)?;

        let mut driver = self.load_driver(thread_id, None)?;
        driver
            .drive(Event::ActionResolved {
                action_id: action_id.to_string(),
                approved: confirmed,
                feedback,
            })
            .await?;
        driver.into_outcome()
    }

    /// Read-only snapshot of a thread for inspection
    pub fn snapshot(&self, thread_id: &str) -> Result<Option<crate::checkpoint::Thread>, RuntimeError> {
        Ok(self.checkpoints.snapshot(thread_id)?)
    }

    fn load_driver(
        &self,
        thread_id: &str,
        passenger_id: Option<&str>,
    ) -> Result<ThreadDriver, RuntimeError> {
        let thread = self.checkpoints.create_or_load(thread_id, passenger_id)?;

        // A thread checkpointed mid-request was interrupted by a crash;
        // surface that and let the next message recover it
        let state = match thread.state {
            s @ (ThreadState::Idle
            | ThreadState::Error { .. }
            | ThreadState::AwaitingConfirmation { .. }) => s,
            _ => ThreadState::Error {
                message: "The previous turn was interrupted.".to_string(),
            },
        };

        let context = ThreadContext::new(
            thread_id,
            thread.passenger_id.clone(),
            self.tools.sensitive_names(),
        );

        Ok(ThreadDriver {
            checkpoints: self.checkpoints.clone(),
            engine: self.engine.clone(),
            policy: self.policy.clone(),
            tools: self.tools.clone(),
            llm: self.llm.clone(),
            clock: self.clock.clone(),
            thread_id: thread_id.to_string(),
            context,
            state,
            dialog_stack: thread.dialog_stack,
            last_assistant_text: None,
            surfaced: None,
        })
    }

    /// Hand out the serialization lock for a thread. The registry
    /// holds weak references; entries whose last holder has dropped
    /// are pruned on each lookup.
    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = locks.get(thread_id).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(thread_id.to_string(), Arc::downgrade(&lock));
        lock
    }
}

/// Per-call executor: owns the thread's in-flight state and runs the
/// effects each transition produces
struct ThreadDriver {
    checkpoints: CheckpointStore,
    engine: Arc<BookingEngine>,
    policy: Arc<PolicyService>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    thread_id: String,
    context: ThreadContext,
    state: ThreadState,
    dialog_stack: Vec<String>,
    last_assistant_text: Option<String>,
    surfaced: Option<PendingAction>,
}

impl ThreadDriver {
    /// Feed one event and run until the machine rests
    async fn drive(&mut self, event: Event) -> Result<(), RuntimeError> {
        let mut queue = vec![event];
        while let Some(event) = queue.pop() {
            let result = transition(&self.state, &self.context, event)?;
            self.state = result.new_state;
            self.update_dialog_stack();
            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect).await? {
                    queue.push(generated);
                }
            }
        }
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, RuntimeError> {
        match effect {
            Effect::PersistMessage { message } => {
                if message.role == Role::Assistant {
                    if let Some(text) = &message.content {
                        self.last_assistant_text = Some(text.clone());
                    }
                }
                self.checkpoints.append_message(&self.thread_id, &message)?;
                Ok(None)
            }

            Effect::PersistState => {
                self.checkpoints
                    .update_state(&self.thread_id, &self.state, &self.dialog_stack)?;
                Ok(None)
            }

            Effect::RequestModel => {
                let request = self.build_request()?;
                let attempt = match &self.state {
                    ThreadState::AssistantRequesting { attempt, .. } => *attempt,
                    _ => 1,
                };
                tracing::debug!(
                    thread_id = %self.thread_id,
                    model = %self.llm.model_id(),
                    attempt,
                    "requesting model"
                );
                let event = match self.llm.complete(&request).await {
                    Ok(response) => Event::ModelResponse {
                        content: response.content,
                    },
                    Err(e) => {
                        tracing::warn!(thread_id = %self.thread_id, error = %e, "model request failed");
                        Event::ModelError {
                            message: e.message.clone(),
                            kind: e.kind,
                            attempt,
                        }
                    }
                };
                Ok(Some(event))
            }

            Effect::ExecuteTool { request } => {
                tracing::info!(
                    thread_id = %self.thread_id,
                    tool = %request.name,
                    id = %request.id,
                    "executing tool"
                );
                let ctx = ToolContext::new(
                    self.thread_id.clone(),
                    self.context.passenger_id.clone(),
                    self.engine.clone(),
                    self.policy.clone(),
                );
                let output = self
                    .tools
                    .execute(&request.name, request.arguments.clone(), ctx)
                    .await;
                let (output, is_error) = match output {
                    Some(out) => (out.output, !out.success),
                    None => (format!("Unknown tool: {}", request.name), true),
                };
                Ok(Some(Event::ToolComplete {
                    request_id: request.id,
                    output,
                    is_error,
                }))
            }

            Effect::PushPendingAction { action } => {
                self.checkpoints
                    .push_pending_action(&self.thread_id, &action)?;
                Ok(None)
            }

            Effect::MarkActionResolved { action_id } => {
                self.checkpoints
                    .resolve_pending_action(&self.thread_id, &action_id)?;
                Ok(None)
            }

            Effect::SurfaceConfirmation { action } => {
                self.surfaced = Some(action);
                Ok(None)
            }

            Effect::ScheduleRetry { delay, attempt } => {
                tracing::info!(
                    thread_id = %self.thread_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying model request after backoff"
                );
                tokio::time::sleep(delay).await;
                Ok(Some(Event::RetryTimeout { attempt }))
            }
        }
    }

    /// Rebuild the model request from the persisted message log
    fn build_request(&self) -> Result<LlmRequest, RuntimeError> {
        let thread = self
            .checkpoints
            .snapshot(&self.thread_id)?
            .ok_or_else(|| {
                RuntimeError::Persistence(CheckpointError::Corrupt(format!(
                    "thread {} vanished",
                    self.thread_id
                )))
            })?;

        let messages = thread
            .messages
            .iter()
            .map(|m| match m.role {
                Role::User => {
                    LlmMessage::user(vec![ContentBlock::text(m.content.clone().unwrap_or_default())])
                }
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(text) = &m.content {
                        blocks.push(ContentBlock::text(text));
                    }
                    for call in &m.tool_calls {
                        blocks.push(ContentBlock::tool_use(
                            &call.id,
                            &call.name,
                            call.arguments.clone(),
                        ));
                    }
                    LlmMessage::assistant(blocks)
                }
                Role::Tool => LlmMessage::user(vec![ContentBlock::tool_result(
                    m.tool_call_id.clone().unwrap_or_default(),
                    m.content.clone().unwrap_or_default(),
                    m.is_error,
                )]),
            })
            .collect();

        Ok(LlmRequest {
            system: build_system_prompt(self.context.passenger_id.as_deref(), self.clock.now()),
            messages,
            tools: self.tools.definitions(),
            max_tokens: Some(4096),
        })
    }

    fn update_dialog_stack(&mut self) {
        let mut stack = vec!["assistant".to_string()];
        match &self.state {
            ThreadState::ToolExecuting { .. } => stack.push("safe_tools".to_string()),
            ThreadState::AwaitingConfirmation { .. } => stack.push("sensitive_tools".to_string()),
            _ => {}
        }
        self.dialog_stack = stack;
    }

    fn into_outcome(self) -> Result<ChatOutcome, RuntimeError> {
        match self.state {
            ThreadState::Idle => Ok(ChatOutcome {
                thread_id: self.thread_id,
                response: self.last_assistant_text.unwrap_or_default(),
                requires_confirmation: false,
                action: None,
            }),
            ThreadState::AwaitingConfirmation { .. } => {
                let action = self.surfaced.map(|a| ActionDetails {
                    id: a.id,
                    tool_name: a.tool_name,
                    arguments: a.arguments,
                });
                Ok(ChatOutcome {
                    thread_id: self.thread_id,
                    response: self
                        .last_assistant_text
                        .unwrap_or_else(|| CONFIRMATION_NOTICE.to_string()),
                    requires_confirmation: true,
                    action,
                })
            }
            ThreadState::Error { message } => Err(RuntimeError::Model { message }),
            other => Err(RuntimeError::Transition(TransitionError::InvalidTransition(
                format!("turn ended in non-resting state {other:?}"),
            ))),
        }
    }
}
