//! Resource store for bookable inventory
//!
//! Transactional key-addressed storage over SQLite for flights,
//! tickets, hotels, car rentals, and excursions. The single connection
//! mutex serializes every read-check-write sequence, so two concurrent
//! mutations of the same resource or location cannot interleave
//! between validation and write.

use super::{BookingResult, ResourceKind};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS flights (
    flight_id INTEGER PRIMARY KEY,
    flight_no TEXT NOT NULL,
    departure_airport TEXT NOT NULL,
    arrival_airport TEXT NOT NULL,
    scheduled_departure TEXT NOT NULL,
    scheduled_arrival TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Scheduled',
    aircraft_code TEXT
);

CREATE TABLE IF NOT EXISTS tickets (
    ticket_no TEXT PRIMARY KEY,
    passenger_id TEXT NOT NULL,
    flight_id INTEGER NOT NULL REFERENCES flights(flight_id)
);

CREATE TABLE IF NOT EXISTS seats (
    aircraft_code TEXT NOT NULL,
    seat_no TEXT NOT NULL,
    fare_conditions TEXT NOT NULL,
    PRIMARY KEY (aircraft_code, seat_no)
);

CREATE TABLE IF NOT EXISTS boarding_passes (
    ticket_no TEXT NOT NULL,
    flight_id INTEGER NOT NULL,
    seat_no TEXT NOT NULL,
    PRIMARY KEY (ticket_no, flight_id)
);

CREATE TABLE IF NOT EXISTS hotels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    price_tier TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    passenger_id TEXT,
    booked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS car_rentals (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    price_tier TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    passenger_id TEXT,
    booked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS excursions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    location TEXT NOT NULL,
    description TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    passenger_id TEXT,
    booked INTEGER NOT NULL DEFAULT 0
);
";

/// The date-ranged resource kinds that share the generic booking
/// contract (tickets ride on flights and are handled separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StayKind {
    Hotel,
    CarRental,
    Excursion,
}

impl StayKind {
    pub fn table(self) -> &'static str {
        match self {
            StayKind::Hotel => "hotels",
            StayKind::CarRental => "car_rentals",
            StayKind::Excursion => "excursions",
        }
    }

    pub fn kind(self) -> ResourceKind {
        match self {
            StayKind::Hotel => ResourceKind::Hotel,
            StayKind::CarRental => ResourceKind::CarRental,
            StayKind::Excursion => ResourceKind::Excursion,
        }
    }
}

/// Thread-safe handle to the inventory database
#[derive(Clone)]
pub struct ResourceStore {
    conn: Arc<Mutex<Connection>>,
}

impl ResourceStore {
    /// Open or create the inventory database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> BookingResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory inventory database (for testing)
    pub fn open_in_memory() -> BookingResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BookingResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection while holding the store
    /// lock. Mutations open a transaction inside the closure; the lock
    /// makes the whole check-then-write sequence atomic with respect
    /// to other callers.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> BookingResult<T>,
    ) -> BookingResult<T> {
        let mut conn = self.conn.lock().expect("resource store lock poisoned");
        f(&mut conn)
    }

    // ==================== Search (side-effect-free) ====================

    /// Every ticket held by a passenger, joined with the flight it
    /// rides on and any boarding-pass seat assignment
    pub fn user_flight_information(&self, passenger_id: &str) -> BookingResult<Vec<Value>> {
        self.with_conn(|conn| {
            query_json(
                conn,
                "SELECT t.ticket_no, t.passenger_id,
                        f.flight_id, f.flight_no, f.departure_airport, f.arrival_airport,
                        f.scheduled_departure, f.scheduled_arrival, f.status,
                        bp.seat_no, s.fare_conditions
                 FROM tickets t
                 JOIN flights f ON f.flight_id = t.flight_id
                 LEFT JOIN boarding_passes bp
                   ON bp.ticket_no = t.ticket_no AND bp.flight_id = f.flight_id
                 LEFT JOIN seats s
                   ON s.aircraft_code = f.aircraft_code AND s.seat_no = bp.seat_no
                 WHERE t.passenger_id = ?1
                 ORDER BY f.scheduled_departure, t.ticket_no",
                &[passenger_id.to_string()],
            )
        })
    }

    /// Search flights by route, optionally narrowed to a departure day
    pub fn search_flights(
        &self,
        departure_airport: &str,
        arrival_airport: &str,
        departure_date: Option<&str>,
    ) -> BookingResult<Vec<Value>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT flight_id, flight_no, departure_airport, arrival_airport,
                        scheduled_departure, scheduled_arrival, status
                 FROM flights
                 WHERE departure_airport = ?1 AND arrival_airport = ?2",
            );
            let mut params: Vec<String> =
                vec![departure_airport.to_string(), arrival_airport.to_string()];
            if let Some(date) = departure_date {
                sql.push_str(" AND scheduled_departure LIKE ?3");
                params.push(format!("{date}%"));
            }
            sql.push_str(" ORDER BY scheduled_departure");
            query_json(conn, &sql, &params)
        })
    }

    /// Flight row plus current seat assignments
    pub fn flight_status(&self, flight_id: i64) -> BookingResult<Option<Value>> {
        self.with_conn(|conn| {
            let rows = query_json(
                conn,
                "SELECT flight_id, flight_no, departure_airport, arrival_airport,
                        scheduled_departure, scheduled_arrival, status
                 FROM flights WHERE flight_id = ?1",
                &[flight_id.to_string()],
            )?;
            let Some(Value::Object(mut flight)) = rows.into_iter().next() else {
                return Ok(None);
            };

            let assignments = query_json(
                conn,
                "SELECT bp.seat_no, t.passenger_id
                 FROM boarding_passes bp
                 JOIN tickets t ON t.ticket_no = bp.ticket_no
                 WHERE bp.flight_id = ?1
                 ORDER BY bp.seat_no",
                &[flight_id.to_string()],
            )?;
            flight.insert("seat_assignments".to_string(), Value::Array(assignments));
            Ok(Some(Value::Object(flight)))
        })
    }

    /// Seats on the flight's aircraft not yet assigned a boarding pass
    pub fn available_seats(&self, flight_id: i64) -> BookingResult<Vec<Value>> {
        self.with_conn(|conn| {
            query_json(
                conn,
                "SELECT s.seat_no, s.fare_conditions
                 FROM flights f
                 JOIN seats s ON s.aircraft_code = f.aircraft_code
                 WHERE f.flight_id = ?1
                   AND s.seat_no NOT IN (
                       SELECT seat_no FROM boarding_passes WHERE flight_id = ?1
                   )
                 ORDER BY s.seat_no",
                &[flight_id.to_string()],
            )
        })
    }

    /// Search hotels or car rentals by location, optionally by tier
    pub fn search_stays(
        &self,
        kind: StayKind,
        location: &str,
        price_tier: Option<&str>,
    ) -> BookingResult<Vec<Value>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT * FROM {} WHERE location = ?1", kind.table());
            let mut params: Vec<String> = vec![location.to_string()];
            if let Some(tier) = price_tier {
                sql.push_str(" AND price_tier = ?2");
                params.push(tier.to_string());
            }
            sql.push_str(" ORDER BY id");
            query_json(conn, &sql, &params)
        })
    }

    /// Search excursions by location with simple keyword matching
    pub fn search_excursions(
        &self,
        location: &str,
        keywords: Option<&str>,
    ) -> BookingResult<Vec<Value>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM excursions WHERE location = ?1");
            let mut params: Vec<String> = vec![location.to_string()];
            if let Some(kw) = keywords {
                sql.push_str(" AND (name LIKE ?2 OR description LIKE ?2)");
                params.push(format!("%{kw}%"));
            }
            sql.push_str(" ORDER BY id");
            query_json(conn, &sql, &params)
        })
    }
}

/// Run a query and render each row as a JSON object keyed by column
/// name. All inventory values are NULL, integer, real, or text.
fn query_json(conn: &Connection, sql: &str, params: &[String]) -> BookingResult<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        let mut obj = Map::new();
        for (i, name) in columns.iter().enumerate() {
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(n) => Value::from(n),
                rusqlite::types::ValueRef::Real(f) => Value::from(f),
                rusqlite::types::ValueRef::Text(t) => {
                    Value::String(String::from_utf8_lossy(t).into_owned())
                }
                rusqlite::types::ValueRef::Blob(_) => Value::Null,
            };
            obj.insert(name.clone(), value);
        }
        Ok(Value::Object(obj))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
