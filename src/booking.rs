//! Booking validation and mutation engine
//!
//! Enforces ownership, date-ordering, conflict, and cutoff-window
//! invariants across tickets, hotels, car rentals, and excursions.

mod engine;
mod store;
pub mod time;

pub use engine::BookingEngine;
pub use store::{ResourceStore, StayKind};
pub use time::{Clock, SystemClock};

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// The bookable resource kinds, as named in user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Flight,
    Ticket,
    Hotel,
    CarRental,
    Excursion,
}

impl ResourceKind {
    /// Human-readable label used in error messages
    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Flight => "flight",
            ResourceKind::Ticket => "ticket",
            ResourceKind::Hotel => "hotel booking",
            ResourceKind::CarRental => "car rental",
            ResourceKind::Excursion => "excursion",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Validation and storage failures for booking operations.
///
/// Every variant except `Storage` is a business-rule violation that is
/// surfaced back into the conversation as a tool message so the model
/// can correct course.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("No passenger ID configured.")]
    MissingIdentity,

    #[error("No {kind} found matching {id}.")]
    NotFound { kind: ResourceKind, id: String },

    #[error("The signed-in passenger (ID: {passenger_id}) is not the owner of {kind} {id}.")]
    NotOwner {
        kind: ResourceKind,
        id: String,
        passenger_id: String,
    },

    #[error("The end date must be after the start date.")]
    InvalidDateOrder,

    #[error("The selected dates conflict with another booking.")]
    DateConflict,

    #[error("Flights departing within 3 hours cannot be selected. The chosen flight departs at {departure}.")]
    TooLateToModify { departure: DateTime<FixedOffset> },

    #[error("Bookings starting within 24 hours cannot be cancelled. The start time is {start}.")]
    TooLateToCancel { start: DateTime<FixedOffset> },

    #[error("Could not parse timestamp: {raw}")]
    InvalidTimestamp { raw: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type BookingResult<T> = Result<T, BookingError>;
