//! Validation and mutation engine
//!
//! One generic contract parameterized by resource kind. Every
//! mutating operation: identity, then existence, then ownership, then
//! date ordering, then conflicts, then cutoff windows, then the write.
//! The whole sequence runs inside one transaction under the store
//! lock, so validation and mutation are observed as a single unit.

use super::store::StayKind;
use super::time::{cancel_cutoff, parse_timestamp, reschedule_cutoff, to_canonical, Clock};
use super::{BookingError, BookingResult, ResourceKind, ResourceStore};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

pub struct BookingEngine {
    store: ResourceStore,
    clock: Arc<dyn Clock>,
}

impl BookingEngine {
    pub fn new(store: ResourceStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Move a ticket to a different flight.
    ///
    /// The 3-hour cutoff applies to the newly selected flight's
    /// departure, not the currently booked one.
    pub fn reschedule_ticket(
        &self,
        passenger_id: Option<&str>,
        ticket_no: &str,
        new_flight_id: i64,
    ) -> BookingResult<String> {
        let passenger_id = require_identity(passenger_id)?;
        let now = self.clock.now();

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            let owner: Option<String> = tx
                .query_row(
                    "SELECT passenger_id FROM tickets WHERE ticket_no = ?1",
                    params![ticket_no],
                    |row| row.get(0),
                )
                .optional()?;
            let owner = owner.ok_or_else(|| not_found(ResourceKind::Ticket, ticket_no))?;
            if owner != passenger_id {
                return Err(not_owner(ResourceKind::Ticket, ticket_no, passenger_id));
            }

            let departure_raw: Option<String> = tx
                .query_row(
                    "SELECT scheduled_departure FROM flights WHERE flight_id = ?1",
                    params![new_flight_id],
                    |row| row.get(0),
                )
                .optional()?;
            let departure_raw = departure_raw.ok_or_else(|| BookingError::NotFound {
                kind: ResourceKind::Flight,
                id: new_flight_id.to_string(),
            })?;

            let departure = parse_timestamp(&departure_raw)?;
            if departure - now < reschedule_cutoff() {
                return Err(BookingError::TooLateToModify { departure });
            }

            tx.execute(
                "UPDATE tickets SET flight_id = ?1 WHERE ticket_no = ?2",
                params![new_flight_id, ticket_no],
            )?;
            tx.commit()?;
            Ok("Ticket successfully updated to the new flight.".to_string())
        })
    }

    /// Cancel a ticket, removing it and its boarding passes.
    pub fn cancel_ticket(
        &self,
        passenger_id: Option<&str>,
        ticket_no: &str,
    ) -> BookingResult<String> {
        let passenger_id = require_identity(passenger_id)?;
        let now = self.clock.now();

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;

            let row: Option<(String, String)> = tx
                .query_row(
                    "SELECT t.passenger_id, f.scheduled_departure
                     FROM tickets t
                     JOIN flights f ON f.flight_id = t.flight_id
                     WHERE t.ticket_no = ?1",
                    params![ticket_no],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (owner, departure_raw) =
                row.ok_or_else(|| not_found(ResourceKind::Ticket, ticket_no))?;
            if owner != passenger_id {
                return Err(not_owner(ResourceKind::Ticket, ticket_no, passenger_id));
            }

            let departure = parse_timestamp(&departure_raw)?;
            if departure - now < cancel_cutoff() {
                return Err(BookingError::TooLateToCancel { start: departure });
            }

            tx.execute(
                "DELETE FROM boarding_passes WHERE ticket_no = ?1",
                params![ticket_no],
            )?;
            tx.execute("DELETE FROM tickets WHERE ticket_no = ?1", params![ticket_no])?;
            tx.commit()?;
            Ok("Ticket successfully cancelled.".to_string())
        })
    }

    /// Book a hotel, car rental, or excursion, assigning ownership.
    ///
    /// First-time booking requires existence but no prior ownership.
    pub fn book_stay(
        &self,
        kind: StayKind,
        passenger_id: Option<&str>,
        id: i64,
    ) -> BookingResult<String> {
        let passenger_id = require_identity(passenger_id)?;

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            stay_row(&tx, kind, id)?;
            tx.execute(
                &format!(
                    "UPDATE {} SET booked = 1, passenger_id = ?1 WHERE id = ?2",
                    kind.table()
                ),
                params![passenger_id, id],
            )?;
            tx.commit()?;
            Ok(format!("{} successfully booked.", capitalize(kind.kind().label())))
        })
    }

    /// Rewrite the date range of an owned booking.
    pub fn update_stay(
        &self,
        kind: StayKind,
        passenger_id: Option<&str>,
        id: i64,
        new_start: &str,
        new_end: &str,
    ) -> BookingResult<String> {
        let passenger_id = require_identity(passenger_id)?;

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let (owner, location) = stay_row(&tx, kind, id)?;
            if owner.as_deref() != Some(passenger_id) {
                return Err(not_owner(kind.kind(), &id.to_string(), passenger_id));
            }

            let start = parse_timestamp(new_start)?;
            let end = parse_timestamp(new_end)?;
            if end <= start {
                return Err(BookingError::InvalidDateOrder);
            }

            let start_s = to_canonical(start);
            let end_s = to_canonical(end);
            let conflicts: i64 = tx.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {}
                     WHERE id != ?1 AND location = ?2 AND booked = 1
                       AND ((start_date BETWEEN ?3 AND ?4)
                         OR (end_date BETWEEN ?3 AND ?4)
                         OR (start_date <= ?3 AND end_date >= ?4))",
                    kind.table()
                ),
                params![id, location, start_s, end_s],
                |row| row.get(0),
            )?;
            if conflicts > 0 {
                return Err(BookingError::DateConflict);
            }

            tx.execute(
                &format!(
                    "UPDATE {} SET start_date = ?1, end_date = ?2 WHERE id = ?3",
                    kind.table()
                ),
                params![start_s, end_s, id],
            )?;
            tx.commit()?;
            Ok(format!(
                "{} dates successfully updated.",
                capitalize(kind.kind().label())
            ))
        })
    }

    /// Cancel an owned booking, detaching it from the passenger.
    pub fn cancel_stay(
        &self,
        kind: StayKind,
        passenger_id: Option<&str>,
        id: i64,
    ) -> BookingResult<String> {
        let passenger_id = require_identity(passenger_id)?;
        let now = self.clock.now();

        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let (owner, start_raw): (Option<String>, String) = tx
                .query_row(
                    &format!(
                        "SELECT passenger_id, start_date FROM {} WHERE id = ?1",
                        kind.table()
                    ),
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| not_found(kind.kind(), &id.to_string()))?;
            if owner.as_deref() != Some(passenger_id) {
                return Err(not_owner(kind.kind(), &id.to_string(), passenger_id));
            }

            let start = parse_timestamp(&start_raw)?;
            if start - now < cancel_cutoff() {
                return Err(BookingError::TooLateToCancel { start });
            }

            tx.execute(
                &format!(
                    "UPDATE {} SET booked = 0, passenger_id = NULL WHERE id = ?1",
                    kind.table()
                ),
                params![id],
            )?;
            tx.commit()?;
            Ok(format!(
                "{} successfully cancelled.",
                capitalize(kind.kind().label())
            ))
        })
    }
}

fn require_identity(passenger_id: Option<&str>) -> BookingResult<&str> {
    match passenger_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(BookingError::MissingIdentity),
    }
}

fn stay_row(
    conn: &Connection,
    kind: StayKind,
    id: i64,
) -> BookingResult<(Option<String>, String)> {
    conn.query_row(
        &format!(
            "SELECT passenger_id, location FROM {} WHERE id = ?1",
            kind.table()
        ),
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| not_found(kind.kind(), &id.to_string()))
}

fn not_found(kind: ResourceKind, id: &str) -> BookingError {
    BookingError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn not_owner(kind: ResourceKind, id: &str, passenger_id: &str) -> BookingError {
    BookingError::NotOwner {
        kind,
        id: id.to_string(),
        passenger_id: passenger_id.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
