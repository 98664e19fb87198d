//! System prompt assembly
//!
//! The caller's identity and the current time are injected into the
//! prompt on every model request, so the model always reasons against
//! fresh context even on resumed threads.

use chrono::{DateTime, FixedOffset};

pub fn build_system_prompt(passenger_id: Option<&str>, now: DateTime<FixedOffset>) -> String {
    let user_info = match passenger_id {
        Some(id) => format!("Passenger ID: {id}"),
        None => "No passenger identity on file. Booking changes require one.".to_string(),
    };
    format!(
        "You are a helpful customer support assistant for Swiss Airlines. \
         Use the provided tools to search for flights, company policies, and other \
         information to assist the user's queries. Be persistent when searching: if a \
         search comes up empty, expand your search bounds before giving up. \
         Booking changes are only possible for resources owned by the current user.\n\n\
         Current user:\n<User>\n{user_info}\n</User>\n\n\
         Current time: {}",
        now.format("%Y-%m-%d %H:%M:%S %:z")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::time::operational_offset;
    use chrono::TimeZone;

    #[test]
    fn prompt_carries_identity_and_time() {
        let now = operational_offset()
            .with_ymd_and_hms(2024, 4, 15, 12, 0, 0)
            .unwrap();
        let prompt = build_system_prompt(Some("P100"), now);
        assert!(prompt.contains("Passenger ID: P100"));
        assert!(prompt.contains("2024-04-15 12:00:00 +03:00"));
    }

    #[test]
    fn prompt_notes_missing_identity() {
        let now = operational_offset()
            .with_ymd_and_hms(2024, 4, 15, 12, 0, 0)
            .unwrap();
        let prompt = build_system_prompt(None, now);
        assert!(prompt.contains("No passenger identity"));
    }
}
