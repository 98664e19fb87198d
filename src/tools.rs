//! Tool implementations for the travel assistant
//!
//! Tools are stateless singletons; all per-call context arrives via
//! `ToolContext`. Each tool carries a fixed sensitivity class: safe
//! tools run immediately, sensitive tools pause the thread for an
//! approve/deny decision first.

mod flights;
mod policy;
mod stays;

pub use flights::{
    CancelTicketTool, CheckFlightStatusTool, FetchUserFlightInformationTool,
    GetAvailableSeatsTool, SearchFlightsTool, UpdateTicketTool,
};
pub use policy::{LookupPolicyTool, PolicyService, SWISS_FAQ_URL};
pub use stays::{BookStayTool, CancelStayTool, SearchStaysTool, UpdateStayTool};

use crate::booking::{BookingEngine, BookingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Execution class of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Read-only; executes without confirmation
    Safe,
    /// Mutates bookings; requires confirmation before execution
    Sensitive,
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call with the thread's identity
/// already resolved.
#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub passenger_id: Option<String>,
    engine: Arc<BookingEngine>,
    policy: Arc<PolicyService>,
}

impl ToolContext {
    pub fn new(
        thread_id: String,
        passenger_id: Option<String>,
        engine: Arc<BookingEngine>,
        policy: Arc<PolicyService>,
    ) -> Self {
        Self {
            thread_id,
            passenger_id,
            engine,
            policy,
        }
    }

    pub fn engine(&self) -> &BookingEngine {
        &self.engine
    }

    pub fn policy(&self) -> &PolicyService {
        &self.policy
    }

    pub fn passenger_id(&self) -> Option<&str> {
        self.passenger_id.as_deref()
    }
}

/// Trait for tools the assistant can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Whether this tool needs confirmation before running
    fn sensitivity(&self) -> Sensitivity;

    /// Execute the tool with all context provided via `ToolContext`
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to threads
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// The full travel-assistant tool set
    pub fn standard() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            // Flights
            Arc::new(FetchUserFlightInformationTool),
            Arc::new(SearchFlightsTool),
            Arc::new(CheckFlightStatusTool),
            Arc::new(GetAvailableSeatsTool),
            Arc::new(UpdateTicketTool),
            Arc::new(CancelTicketTool),
            // Hotels
            Arc::new(SearchStaysTool::hotels()),
            Arc::new(BookStayTool::hotel()),
            Arc::new(UpdateStayTool::hotel()),
            Arc::new(CancelStayTool::hotel()),
            // Car rentals
            Arc::new(SearchStaysTool::car_rentals()),
            Arc::new(BookStayTool::car_rental()),
            Arc::new(UpdateStayTool::car_rental()),
            Arc::new(CancelStayTool::car_rental()),
            // Excursions
            Arc::new(SearchStaysTool::excursions()),
            Arc::new(BookStayTool::excursion()),
            Arc::new(UpdateStayTool::excursion()),
            Arc::new(CancelStayTool::excursion()),
            // Policy
            Arc::new(LookupPolicyTool),
        ];
        Self { tools }
    }

    /// Get all tool definitions for the model
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Sensitivity class of a registered tool
    pub fn classification(&self, name: &str) -> Option<Sensitivity> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.sensitivity())
    }

    /// Names of all tools that require confirmation
    pub fn sensitive_names(&self) -> HashSet<String> {
        self.tools
            .iter()
            .filter(|t| t.sensitivity() == Sensitivity::Sensitive)
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Execute a tool by name with context
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}

/// Render an engine result as a tool output. Validation failures come
/// back as error outputs so the model can correct course.
pub(crate) fn booking_output(result: BookingResult<String>) -> ToolOutput {
    match result {
        Ok(message) => ToolOutput::success(message),
        Err(err) => ToolOutput::error(err.to_string()),
    }
}

/// Render query rows as a JSON array string
pub(crate) fn rows_output(result: BookingResult<Vec<Value>>) -> ToolOutput {
    match result {
        Ok(rows) => match serde_json::to_string(&rows) {
            Ok(json) => ToolOutput::success(json),
            Err(e) => ToolOutput::error(format!("Failed to render results: {e}")),
        },
        Err(err) => ToolOutput::error(err.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::booking::time::testing::FixedClock;
    use crate::booking::{time::operational_offset, ResourceStore};
    use chrono::TimeZone;

    /// Engine over an empty in-memory store with a fixed clock
    /// (2024-04-15 12:00:00 +03:00) and a canned policy document.
    pub fn test_context(passenger_id: Option<&str>) -> ToolContext {
        let store = ResourceStore::open_in_memory().unwrap();
        let now = operational_offset()
            .with_ymd_and_hms(2024, 4, 15, 12, 0, 0)
            .unwrap();
        let engine = BookingEngine::new(store, Arc::new(FixedClock(now)));
        let policy = PolicyService::from_document(
            "## Cancellations\nTickets may be cancelled up to 24 hours before departure.\n\n## Baggage\nOne carry-on bag is included.",
        );
        ToolContext::new(
            "test-thread".to_string(),
            passenger_id.map(ToString::to_string),
            Arc::new(engine),
            Arc::new(policy),
        )
    }
}
