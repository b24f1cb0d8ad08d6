//! Appointment scheduling: working hours, slot generation, overlap detection,
//! availability checks, calendar views and the appointment status lifecycle.

pub mod availability;
pub mod calendar;
pub mod lifecycle;
pub mod overlap;
pub mod slots;
pub mod working_hours;

use chrono::{NaiveDate, NaiveTime};

use crate::error::DomainError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn parse_date(s: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| DomainError::validation(format!("invalid date '{s}', expected YYYY-MM-DD")))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime, DomainError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| DomainError::validation(format!("invalid time '{s}', expected HH:MM")))
}

/// Serde adapter rendering `NaiveTime` as `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(super::TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_both_time_precisions() {
        let t = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert_eq!(parse_time("09:30").unwrap(), t);
        assert_eq!(parse_time("09:30:00").unwrap(), t);
        assert_matches!(parse_time("9h30"), Err(DomainError::Validation(_)));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(
            parse_date("2026-03-02").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
        assert_matches!(parse_date("02/03/2026"), Err(DomainError::Validation(_)));
        assert_matches!(parse_date("2026-02-30"), Err(DomainError::Validation(_)));
    }
}
