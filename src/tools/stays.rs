//! Hotel, car rental, and excursion tools
//!
//! The three stay-like resource kinds share one booking contract, so
//! each operation is a single tool parameterized by `StayKind`. Tool
//! names and argument fields match the per-kind vocabulary the model
//! sees (hotels use check-in/check-out, the others start/end).

use super::{booking_output, rows_output, Sensitivity, Tool, ToolContext, ToolOutput};
use crate::booking::StayKind;
use async_trait::async_trait;
use serde_json::{json, Value};

fn id_field(kind: StayKind) -> &'static str {
    match kind {
        StayKind::Hotel => "hotel_id",
        StayKind::CarRental => "rental_id",
        StayKind::Excursion => "excursion_id",
    }
}

fn date_fields(kind: StayKind) -> (&'static str, &'static str) {
    match kind {
        StayKind::Hotel => ("new_checkin_date", "new_checkout_date"),
        StayKind::CarRental | StayKind::Excursion => ("new_start_date", "new_end_date"),
    }
}

fn noun(kind: StayKind) -> &'static str {
    match kind {
        StayKind::Hotel => "hotel",
        StayKind::CarRental => "car rental",
        StayKind::Excursion => "excursion",
    }
}

fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolOutput> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolOutput::error(format!("Invalid input: missing field `{field}`")))
}

fn require_i64(input: &Value, field: &str) -> Result<i64, ToolOutput> {
    input
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ToolOutput::error(format!("Invalid input: missing field `{field}`")))
}

/// Search hotels, car rentals, or trip recommendations by location
pub struct SearchStaysTool {
    kind: StayKind,
}

impl SearchStaysTool {
    pub fn hotels() -> Self {
        Self {
            kind: StayKind::Hotel,
        }
    }

    pub fn car_rentals() -> Self {
        Self {
            kind: StayKind::CarRental,
        }
    }

    pub fn excursions() -> Self {
        Self {
            kind: StayKind::Excursion,
        }
    }
}

#[async_trait]
impl Tool for SearchStaysTool {
    fn name(&self) -> &'static str {
        match self.kind {
            StayKind::Hotel => "search_hotels",
            StayKind::CarRental => "search_car_rentals",
            StayKind::Excursion => "search_trip_recommendations",
        }
    }

    fn description(&self) -> String {
        match self.kind {
            StayKind::Hotel => {
                "Search hotels in a location, optionally filtered by price tier.".to_string()
            }
            StayKind::CarRental => {
                "Search car rental options in a location, optionally filtered by price tier."
                    .to_string()
            }
            StayKind::Excursion => {
                "Search recommended trip activities in a location, optionally filtered by keywords."
                    .to_string()
            }
        }
    }

    fn input_schema(&self) -> Value {
        let mut properties = json!({
            "location": {
                "type": "string",
                "description": "City or area to search in"
            }
        });
        let extra = match self.kind {
            StayKind::Hotel | StayKind::CarRental => json!({
                "price_tier": {
                    "type": "string",
                    "description": "Optional price tier, e.g. Midscale or Luxury"
                }
            }),
            StayKind::Excursion => json!({
                "keywords": {
                    "type": "string",
                    "description": "Optional keywords to match against activity names and descriptions"
                }
            }),
        };
        if let (Value::Object(props), Value::Object(extra)) = (&mut properties, extra) {
            props.extend(extra);
        }
        json!({
            "type": "object",
            "required": ["location"],
            "properties": properties
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let location = match require_str(&input, "location") {
            Ok(location) => location,
            Err(output) => return output,
        };
        let store = ctx.engine().store();
        match self.kind {
            StayKind::Hotel | StayKind::CarRental => {
                let tier = input.get("price_tier").and_then(Value::as_str);
                rows_output(store.search_stays(self.kind, location, tier))
            }
            StayKind::Excursion => {
                let keywords = input.get("keywords").and_then(Value::as_str);
                rows_output(store.search_excursions(location, keywords))
            }
        }
    }
}

/// Book a stay-like resource for the current passenger
pub struct BookStayTool {
    kind: StayKind,
}

impl BookStayTool {
    pub fn hotel() -> Self {
        Self {
            kind: StayKind::Hotel,
        }
    }

    pub fn car_rental() -> Self {
        Self {
            kind: StayKind::CarRental,
        }
    }

    pub fn excursion() -> Self {
        Self {
            kind: StayKind::Excursion,
        }
    }
}

#[async_trait]
impl Tool for BookStayTool {
    fn name(&self) -> &'static str {
        match self.kind {
            StayKind::Hotel => "book_hotel",
            StayKind::CarRental => "book_car_rental",
            StayKind::Excursion => "book_excursion",
        }
    }

    fn description(&self) -> String {
        format!("Book the {} with the given ID for the user.", noun(self.kind))
    }

    fn input_schema(&self) -> Value {
        let id = id_field(self.kind);
        json!({
            "type": "object",
            "required": [id],
            "properties": {
                id: {
                    "type": "integer",
                    "description": format!("ID of the {} to book", noun(self.kind))
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Sensitive
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let id = match require_i64(&input, id_field(self.kind)) {
            Ok(id) => id,
            Err(output) => return output,
        };
        booking_output(ctx.engine().book_stay(self.kind, ctx.passenger_id(), id))
    }
}

/// Rewrite the date range of an existing booking
pub struct UpdateStayTool {
    kind: StayKind,
}

impl UpdateStayTool {
    pub fn hotel() -> Self {
        Self {
            kind: StayKind::Hotel,
        }
    }

    pub fn car_rental() -> Self {
        Self {
            kind: StayKind::CarRental,
        }
    }

    pub fn excursion() -> Self {
        Self {
            kind: StayKind::Excursion,
        }
    }
}

#[async_trait]
impl Tool for UpdateStayTool {
    fn name(&self) -> &'static str {
        match self.kind {
            StayKind::Hotel => "update_hotel",
            StayKind::CarRental => "update_car_rental",
            StayKind::Excursion => "update_excursion",
        }
    }

    fn description(&self) -> String {
        format!(
            "Change the dates of the user's {} booking. The new range must not overlap another booked {} in the same location.",
            noun(self.kind),
            noun(self.kind)
        )
    }

    fn input_schema(&self) -> Value {
        let id = id_field(self.kind);
        let (start, end) = date_fields(self.kind);
        json!({
            "type": "object",
            "required": [id, start, end],
            "properties": {
                id: {
                    "type": "integer",
                    "description": format!("ID of the {} booking to change", noun(self.kind))
                },
                start: {
                    "type": "string",
                    "description": "New start of the booking, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
                },
                end: {
                    "type": "string",
                    "description": "New end of the booking, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Sensitive
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let (start_field, end_field) = date_fields(self.kind);
        let id = match require_i64(&input, id_field(self.kind)) {
            Ok(id) => id,
            Err(output) => return output,
        };
        let start = match require_str(&input, start_field) {
            Ok(start) => start,
            Err(output) => return output,
        };
        let end = match require_str(&input, end_field) {
            Ok(end) => end,
            Err(output) => return output,
        };
        booking_output(
            ctx.engine()
                .update_stay(self.kind, ctx.passenger_id(), id, start, end),
        )
    }
}

/// Cancel an existing booking
pub struct CancelStayTool {
    kind: StayKind,
}

impl CancelStayTool {
    pub fn hotel() -> Self {
        Self {
            kind: StayKind::Hotel,
        }
    }

    pub fn car_rental() -> Self {
        Self {
            kind: StayKind::CarRental,
        }
    }

    pub fn excursion() -> Self {
        Self {
            kind: StayKind::Excursion,
        }
    }
}

#[async_trait]
impl Tool for CancelStayTool {
    fn name(&self) -> &'static str {
        match self.kind {
            StayKind::Hotel => "cancel_hotel",
            StayKind::CarRental => "cancel_car_rental",
            StayKind::Excursion => "cancel_excursion",
        }
    }

    fn description(&self) -> String {
        format!(
            "Cancel the user's {} booking. Only allowed more than 24 hours before its start.",
            noun(self.kind)
        )
    }

    fn input_schema(&self) -> Value {
        let id = id_field(self.kind);
        json!({
            "type": "object",
            "required": [id],
            "properties": {
                id: {
                    "type": "integer",
                    "description": format!("ID of the {} booking to cancel", noun(self.kind))
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Sensitive
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let id = match require_i64(&input, id_field(self.kind)) {
            Ok(id) => id,
            Err(output) => return output,
        };
        booking_output(ctx.engine().cancel_stay(self.kind, ctx.passenger_id(), id))
    }
}
