//! Thread checkpoint store
//!
//! Persists per-thread conversation history, pending-action records,
//! and the state machine's position so a paused conversation (for
//! example one awaiting confirmation) can be resumed later, including
//! across process restarts.

use crate::state_machine::ThreadState;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    passenger_id TEXT,
    state TEXT NOT NULL,
    dialog_stack TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES threads(id),
    sequence INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT,
    tool_calls TEXT NOT NULL DEFAULT '[]',
    tool_call_id TEXT,
    is_error INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (thread_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, sequence);

CREATE TABLE IF NOT EXISTS pending_actions (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES threads(id),
    tool_name TEXT NOT NULL,
    arguments TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action already resolved: {0}")]
    AlreadyResolved(String),
    #[error("corrupt checkpoint record: {0}")]
    Corrupt(String),
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Message role within a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn parse(s: &str) -> CheckpointResult<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(CheckpointError::Corrupt(format!("unknown role {other}"))),
        }
    }
}

/// A tool invocation requested by the assistant. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a thread's append-only message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    /// Text content; absent for tool-only assistant directives
    pub content: Option<String>,
    /// Tool invocations requested in this message (assistant only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// The request this message answers (tool role only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether the tool run failed (tool role only)
    #[serde(default)]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: text,
            tool_calls,
            tool_call_id: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            is_error,
            created_at: Utc::now(),
        }
    }
}

/// A sensitive tool request awaiting an external approve/deny decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Equals the originating tool call request id
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn from_request(request: &ToolCallRequest) -> Self {
        Self {
            id: request.id.clone(),
            tool_name: request.name.clone(),
            arguments: request.arguments.clone(),
            resolved: false,
            created_at: Utc::now(),
        }
    }

}

/// One persisted conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub passenger_id: Option<String>,
    pub state: ThreadState,
    pub dialog_stack: Vec<String>,
    pub messages: Vec<ThreadMessage>,
    pub pending_actions: Vec<PendingAction>,
}

/// Thread-safe handle to the checkpoint database
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckpointStore {
    /// Open or create the checkpoint database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> CheckpointResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory checkpoint database (for testing)
    pub fn open_in_memory() -> CheckpointResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CheckpointResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Load the thread, creating a new empty one when the id is unknown.
    ///
    /// A passenger identity supplied after creation is attached to a
    /// thread that does not have one yet; an existing identity wins.
    pub fn create_or_load(
        &self,
        thread_id: &str,
        passenger_id: Option<&str>,
    ) -> CheckpointResult<Thread> {
        {
            let conn = self.lock();
            let now = Utc::now().to_rfc3339();
            let state = serde_json::to_string(&ThreadState::default())
                .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
            conn.execute(
                "INSERT INTO threads (id, passenger_id, state, dialog_stack, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '[\"assistant\"]', ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     passenger_id = COALESCE(threads.passenger_id, excluded.passenger_id)",
                params![thread_id, passenger_id, state, now],
            )?;
        }
        self.snapshot(thread_id)?
            .ok_or_else(|| CheckpointError::Corrupt(format!("thread {thread_id} vanished")))
    }

    /// Full thread read for resume; `None` when the id is unknown
    pub fn snapshot(&self, thread_id: &str) -> CheckpointResult<Option<Thread>> {
        let conn = self.lock();

        let header: Option<(Option<String>, String, String)> = conn
            .query_row(
                "SELECT passenger_id, state, dialog_stack FROM threads WHERE id = ?1",
                params![thread_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((passenger_id, state_json, stack_json)) = header else {
            return Ok(None);
        };

        let state: ThreadState = serde_json::from_str(&state_json).unwrap_or_default();
        let dialog_stack: Vec<String> = serde_json::from_str(&stack_json)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT message_id, role, content, tool_calls, tool_call_id, is_error, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY sequence",
        )?;
        let messages = stmt
            .query_map(params![thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, role, content, calls_json, tool_call_id, is_error, created_at)| {
                Ok(ThreadMessage {
                    id,
                    role: Role::parse(&role)?,
                    content,
                    tool_calls: serde_json::from_str(&calls_json)
                        .map_err(|e| CheckpointError::Corrupt(e.to_string()))?,
                    tool_call_id,
                    is_error,
                    created_at: parse_created_at(&created_at)?,
                })
            })
            .collect::<CheckpointResult<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, tool_name, arguments, resolved, created_at
             FROM pending_actions WHERE thread_id = ?1 AND resolved = 0
             ORDER BY created_at",
        )?;
        let pending_actions = stmt
            .query_map(params![thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, tool_name, args_json, resolved, created_at)| {
                Ok(PendingAction {
                    id,
                    tool_name,
                    arguments: serde_json::from_str(&args_json)
                        .map_err(|e| CheckpointError::Corrupt(e.to_string()))?,
                    resolved,
                    created_at: parse_created_at(&created_at)?,
                })
            })
            .collect::<CheckpointResult<Vec<_>>>()?;

        Ok(Some(Thread {
            id: thread_id.to_string(),
            passenger_id,
            state,
            dialog_stack,
            messages,
            pending_actions,
        }))
    }

    /// Append one message to the thread's log
    pub fn append_message(&self, thread_id: &str, message: &ThreadMessage) -> CheckpointResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        let calls_json = serde_json::to_string(&message.tool_calls)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        tx.execute(
            "INSERT INTO messages (message_id, thread_id, sequence, role, content, tool_calls, tool_call_id, is_error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                thread_id,
                next_seq,
                message.role.as_str(),
                message.content,
                calls_json,
                message.tool_call_id,
                message.is_error,
                message.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
            params![thread_id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Persist the machine state and dialog stack
    pub fn update_state(
        &self,
        thread_id: &str,
        state: &ThreadState,
        dialog_stack: &[String],
    ) -> CheckpointResult<()> {
        let conn = self.lock();
        let state_json =
            serde_json::to_string(state).map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        let stack_json = serde_json::to_string(dialog_stack)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        conn.execute(
            "UPDATE threads SET state = ?2, dialog_stack = ?3, updated_at = ?4 WHERE id = ?1",
            params![thread_id, state_json, stack_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a sensitive tool request awaiting confirmation
    pub fn push_pending_action(
        &self,
        thread_id: &str,
        action: &PendingAction,
    ) -> CheckpointResult<()> {
        let conn = self.lock();
        let args_json = serde_json::to_string(&action.arguments)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        conn.execute(
            "INSERT INTO pending_actions (id, thread_id, tool_name, arguments, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                action.id,
                thread_id,
                action.tool_name,
                args_json,
                action.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up an outstanding action.
    ///
    /// Fails with `UnknownAction` when no such action exists on the
    /// thread and `AlreadyResolved` when it was decided before.
    pub fn get_pending_action(
        &self,
        thread_id: &str,
        action_id: &str,
    ) -> CheckpointResult<PendingAction> {
        let conn = self.lock();
        let row: Option<(String, String, bool, String)> = conn
            .query_row(
                "SELECT tool_name, arguments, resolved, created_at
                 FROM pending_actions WHERE id = ?1 AND thread_id = ?2",
                params![action_id, thread_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (tool_name, args_json, resolved, created_at) =
            row.ok_or_else(|| CheckpointError::UnknownAction(action_id.to_string()))?;
        if resolved {
            return Err(CheckpointError::AlreadyResolved(action_id.to_string()));
        }
        Ok(PendingAction {
            id: action_id.to_string(),
            tool_name,
            arguments: serde_json::from_str(&args_json)
                .map_err(|e| CheckpointError::Corrupt(e.to_string()))?,
            resolved,
            created_at: parse_created_at(&created_at)?,
        })
    }

    /// Mark an action resolved; each action resolves exactly once.
    pub fn resolve_pending_action(
        &self,
        thread_id: &str,
        action_id: &str,
    ) -> CheckpointResult<()> {
        let conn = self.lock();
        let resolved: Option<bool> = conn
            .query_row(
                "SELECT resolved FROM pending_actions WHERE id = ?1 AND thread_id = ?2",
                params![action_id, thread_id],
                |row| row.get(0),
            )
            .optional()?;
        match resolved {
            None => Err(CheckpointError::UnknownAction(action_id.to_string())),
            Some(true) => Err(CheckpointError::AlreadyResolved(action_id.to_string())),
            Some(false) => {
                conn.execute(
                    "UPDATE pending_actions SET resolved = 1 WHERE id = ?1 AND thread_id = ?2",
                    params![action_id, thread_id],
                )?;
                Ok(())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("checkpoint store lock poisoned")
    }
}

fn parse_created_at(raw: &str) -> CheckpointResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CheckpointError::Corrupt(format!("bad timestamp {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> CheckpointStore {
        CheckpointStore::open_in_memory().unwrap()
    }

    #[test]
    fn loading_unknown_thread_creates_an_empty_one() {
        let store = store();
        let thread = store.create_or_load("t1", Some("P100")).unwrap();
        assert_eq!(thread.id, "t1");
        assert_eq!(thread.passenger_id.as_deref(), Some("P100"));
        assert!(thread.messages.is_empty());
        assert_eq!(thread.dialog_stack, vec!["assistant".to_string()]);
        assert!(matches!(thread.state, ThreadState::Idle));
    }

    #[test]
    fn existing_passenger_identity_wins() {
        let store = store();
        store.create_or_load("t1", Some("P100")).unwrap();
        let thread = store.create_or_load("t1", Some("P200")).unwrap();
        assert_eq!(thread.passenger_id.as_deref(), Some("P100"));
    }

    #[test]
    fn round_trip_preserves_message_order_and_dialog_stack() {
        let store = store();
        store.create_or_load("t1", None).unwrap();

        let user = ThreadMessage::user("book me a hotel");
        let assistant = ThreadMessage::assistant(
            None,
            vec![ToolCallRequest {
                id: "call-1".to_string(),
                name: "search_hotels".to_string(),
                arguments: json!({"location": "NYC"}),
            }],
        );
        let tool = ThreadMessage::tool("call-1", "[]", false);
        store.append_message("t1", &user).unwrap();
        store.append_message("t1", &assistant).unwrap();
        store.append_message("t1", &tool).unwrap();
        let stack = vec!["assistant".to_string(), "book_hotel".to_string()];
        store
            .update_state("t1", &ThreadState::Idle, &stack)
            .unwrap();

        let thread = store.snapshot("t1").unwrap().unwrap();
        assert_eq!(thread.messages.len(), 3);
        assert_eq!(thread.messages[0].content.as_deref(), Some("book me a hotel"));
        assert_eq!(thread.messages[1].tool_calls.len(), 1);
        assert_eq!(thread.messages[1].tool_calls[0].name, "search_hotels");
        assert_eq!(thread.messages[2].tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(thread.dialog_stack, stack);
    }

    #[test]
    fn snapshot_of_unknown_thread_is_none() {
        let store = store();
        assert!(store.snapshot("missing").unwrap().is_none());
    }

    #[test]
    fn pending_action_resolves_exactly_once() {
        let store = store();
        store.create_or_load("t1", None).unwrap();
        let action = PendingAction {
            id: "a1".to_string(),
            tool_name: "cancel_ticket".to_string(),
            arguments: json!({"ticket_no": "0001"}),
            resolved: false,
            created_at: Utc::now(),
        };
        store.push_pending_action("t1", &action).unwrap();

        let loaded = store.get_pending_action("t1", "a1").unwrap();
        assert_eq!(loaded.tool_name, "cancel_ticket");

        store.resolve_pending_action("t1", "a1").unwrap();
        let err = store.resolve_pending_action("t1", "a1").unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyResolved(_)));
        let err = store.get_pending_action("t1", "a1").unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyResolved(_)));
    }

    #[test]
    fn snapshot_lists_only_outstanding_actions() {
        let store = store();
        store.create_or_load("t1", None).unwrap();
        for id in ["a1", "a2"] {
            let action = PendingAction {
                id: id.to_string(),
                tool_name: "cancel_ticket".to_string(),
                arguments: json!({"ticket_no": "0001"}),
                resolved: false,
                created_at: Utc::now(),
            };
            store.push_pending_action("t1", &action).unwrap();
        }

        store.resolve_pending_action("t1", "a1").unwrap();
        let thread = store.snapshot("t1").unwrap().unwrap();
        let ids: Vec<&str> = thread.pending_actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a2"]);

        store.resolve_pending_action("t1", "a2").unwrap();
        let thread = store.snapshot("t1").unwrap().unwrap();
        assert!(thread.pending_actions.is_empty());
    }

    #[test]
    fn a_paused_thread_survives_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("threads.db");
        let action = ToolCallRequest {
            id: "a1".to_string(),
            name: "cancel_ticket".to_string(),
            arguments: json!({"ticket_no": "0001"}),
        };
        {
            let store = CheckpointStore::open(&path).unwrap();
            store.create_or_load("t1", Some("P100")).unwrap();
            store
                .append_message("t1", &ThreadMessage::user("cancel my ticket"))
                .unwrap();
            let state = ThreadState::AwaitingConfirmation {
                action: action.clone(),
                remaining: vec![],
            };
            let stack = vec!["assistant".to_string(), "sensitive_tools".to_string()];
            store.update_state("t1", &state, &stack).unwrap();
            store
                .push_pending_action("t1", &PendingAction::from_request(&action))
                .unwrap();
        }

        let store = CheckpointStore::open(&path).unwrap();
        let thread = store.snapshot("t1").unwrap().unwrap();
        assert_eq!(thread.passenger_id.as_deref(), Some("P100"));
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.dialog_stack, vec!["assistant", "sensitive_tools"]);
        assert!(
            matches!(thread.state, ThreadState::AwaitingConfirmation { action: a, .. } if a == action)
        );
        let pending = store.get_pending_action("t1", "a1").unwrap();
        assert_eq!(pending.tool_name, "cancel_ticket");
    }

    #[test]
    fn unknown_action_is_reported() {
        let store = store();
        store.create_or_load("t1", None).unwrap();
        let err = store.get_pending_action("t1", "nope").unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownAction(_)));
        let err = store.resolve_pending_action("t1", "nope").unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownAction(_)));
    }
}
