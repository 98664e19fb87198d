//! Flight and ticket tools

use super::{booking_output, rows_output, Sensitivity, Tool, ToolContext, ToolOutput};
use crate::booking::BookingError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// The signed-in passenger's tickets with flight and seat details
pub struct FetchUserFlightInformationTool;

#[async_trait]
impl Tool for FetchUserFlightInformationTool {
    fn name(&self) -> &'static str {
        "fetch_user_flight_information"
    }

    fn description(&self) -> String {
        "List all of the user's tickets along with the flight each one is booked on, its schedule, and any assigned seat.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, _input: Value, ctx: ToolContext) -> ToolOutput {
        match ctx.passenger_id() {
            Some(passenger_id) => {
                rows_output(ctx.engine().store().user_flight_information(passenger_id))
            }
            None => ToolOutput::error(BookingError::MissingIdentity.to_string()),
        }
    }
}

/// Search scheduled flights by route
pub struct SearchFlightsTool;

#[derive(Debug, Deserialize)]
struct SearchFlightsInput {
    departure_airport: String,
    arrival_airport: String,
    #[serde(default)]
    departure_date: Option<String>,
}

#[async_trait]
impl Tool for SearchFlightsTool {
    fn name(&self) -> &'static str {
        "search_flights"
    }

    fn description(&self) -> String {
        "Search scheduled flights between two airports. Optionally narrow to a departure date (YYYY-MM-DD). Returns flight numbers, times, and status.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["departure_airport", "arrival_airport"],
            "properties": {
                "departure_airport": {
                    "type": "string",
                    "description": "IATA code of the departure airport"
                },
                "arrival_airport": {
                    "type": "string",
                    "description": "IATA code of the arrival airport"
                },
                "departure_date": {
                    "type": "string",
                    "description": "Departure day, YYYY-MM-DD"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        match serde_json::from_value::<SearchFlightsInput>(input) {
            Ok(input) => rows_output(ctx.engine().store().search_flights(
                &input.departure_airport,
                &input.arrival_airport,
                input.departure_date.as_deref(),
            )),
            Err(e) => ToolOutput::error(format!("Invalid input: {e}")),
        }
    }
}

/// Current status of a single flight, with seat assignments
pub struct CheckFlightStatusTool;

#[derive(Debug, Deserialize)]
struct FlightIdInput {
    flight_id: i64,
}

#[async_trait]
impl Tool for CheckFlightStatusTool {
    fn name(&self) -> &'static str {
        "check_flight_status"
    }

    fn description(&self) -> String {
        "Look up the current status of a flight by its ID, including schedule, status, and current seat assignments.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["flight_id"],
            "properties": {
                "flight_id": {
                    "type": "integer",
                    "description": "The flight's numeric ID"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: FlightIdInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        match ctx.engine().store().flight_status(input.flight_id) {
            Ok(Some(flight)) => match serde_json::to_string(&flight) {
                Ok(json) => ToolOutput::success(json),
                Err(e) => ToolOutput::error(format!("Failed to render results: {e}")),
            },
            Ok(None) => ToolOutput::error(format!("No flight found with ID {}.", input.flight_id)),
            Err(err) => ToolOutput::error(err.to_string()),
        }
    }
}

/// Unassigned seats on a flight's aircraft
pub struct GetAvailableSeatsTool;

#[async_trait]
impl Tool for GetAvailableSeatsTool {
    fn name(&self) -> &'static str {
        "get_available_seats"
    }

    fn description(&self) -> String {
        "List seats on a flight that have not yet been assigned a boarding pass, with their fare conditions.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["flight_id"],
            "properties": {
                "flight_id": {
                    "type": "integer",
                    "description": "The flight's numeric ID"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        match serde_json::from_value::<FlightIdInput>(input) {
            Ok(input) => rows_output(ctx.engine().store().available_seats(input.flight_id)),
            Err(e) => ToolOutput::error(format!("Invalid input: {e}")),
        }
    }
}

/// Move a ticket to a different flight
pub struct UpdateTicketTool;

#[derive(Debug, Deserialize)]
struct UpdateTicketInput {
    ticket_no: String,
    new_flight_id: i64,
}

#[async_trait]
impl Tool for UpdateTicketTool {
    fn name(&self) -> &'static str {
        "update_ticket_to_new_flight"
    }

    fn description(&self) -> String {
        "Rebook the user's ticket onto a different flight. The new flight must depart at least 3 hours from now.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ticket_no", "new_flight_id"],
            "properties": {
                "ticket_no": {
                    "type": "string",
                    "description": "The ticket number to rebook"
                },
                "new_flight_id": {
                    "type": "integer",
                    "description": "ID of the flight to move the ticket onto"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Sensitive
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        match serde_json::from_value::<UpdateTicketInput>(input) {
            Ok(input) => booking_output(ctx.engine().reschedule_ticket(
                ctx.passenger_id(),
                &input.ticket_no,
                input.new_flight_id,
            )),
            Err(e) => ToolOutput::error(format!("Invalid input: {e}")),
        }
    }
}

/// Cancel the user's ticket
pub struct CancelTicketTool;

#[derive(Debug, Deserialize)]
struct CancelTicketInput {
    ticket_no: String,
}

#[async_trait]
impl Tool for CancelTicketTool {
    fn name(&self) -> &'static str {
        "cancel_ticket"
    }

    fn description(&self) -> String {
        "Cancel the user's ticket and remove its boarding passes. Only allowed while the flight departs more than 24 hours from now.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ticket_no"],
            "properties": {
                "ticket_no": {
                    "type": "string",
                    "description": "The ticket number to cancel"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Sensitive
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        match serde_json::from_value::<CancelTicketInput>(input) {
            Ok(input) => {
                booking_output(ctx.engine().cancel_ticket(ctx.passenger_id(), &input.ticket_no))
            }
            Err(e) => ToolOutput::error(format!("Invalid input: {e}")),
        }
    }
}
