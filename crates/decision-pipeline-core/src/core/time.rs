// crates/decision-pipeline-core/src/core/time.rs
// ============================================================================
// Module: Decision Pipeline Time Model
// Description: Timestamp helpers and serde formats for decision records.
// Purpose: Keep as-of arithmetic and wire formats consistent across primitives.
// Dependencies: serde, time, thiserror
// ============================================================================

//! ## Overview
//! Decisions and evidence are stamped with the input's as-of time instead of
//! the wall clock, so rerunning a run yields identical rows. Wall-clock reads
//! are confined to the [`crate::interfaces::Clock`] port. Timestamps travel
//! as RFC 3339 strings and calendar dates as `YYYY-MM-DD`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use time::Date;
use time::OffsetDateTime;
use time::PrimitiveDateTime;
use time::Time;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Timestamp parsing or formatting failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// Timestamp could not be formatted.
    #[error("timestamp format error: {0}")]
    Format(String),
    /// Timestamp text could not be parsed.
    #[error("timestamp parse error: {0}")]
    Parse(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Formats a timestamp as RFC 3339.
///
/// # Errors
///
/// Returns [`TimeError::Format`] when the timestamp is outside the RFC 3339 range.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TimeError> {
    value.format(&Rfc3339).map_err(|err| TimeError::Format(err.to_string()))
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
///
/// # Errors
///
/// Returns [`TimeError::Parse`] when the text matches neither form.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, TimeError> {
    let trimmed = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(parsed);
    }
    let date_format = time::macros::format_description!("[year]-[month]-[day]");
    let date = Date::parse(trimmed, &date_format)
        .map_err(|_| TimeError::Parse(format!("invalid timestamp: {trimmed}")))?;
    Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc())
}

/// Formats a calendar date as `YYYY-MM-DD`.
///
/// # Errors
///
/// Returns [`TimeError::Format`] when the date cannot be formatted.
pub fn format_date(value: Date) -> Result<String, TimeError> {
    let date_format = time::macros::format_description!("[year]-[month]-[day]");
    value.format(&date_format).map_err(|err| TimeError::Format(err.to_string()))
}

/// Returns the number of calendar days from `earlier` to `later`.
#[must_use]
pub fn days_between(earlier: Date, later: Date) -> i64 {
    (later - earlier).whole_days()
}

/// Returns the timestamp as unix epoch milliseconds.
#[must_use]
pub fn unix_millis(value: OffsetDateTime) -> i64 {
    let millis = value.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Returns elapsed milliseconds between two instants, saturating at zero.
#[must_use]
pub fn elapsed_millis(start: OffsetDateTime, end: OffsetDateTime) -> u64 {
    let millis = (end - start).whole_milliseconds();
    u64::try_from(millis).unwrap_or(0)
}

// ============================================================================
// SECTION: Lenient Fact Deserializers
// ============================================================================

/// Serde helpers for optional fact timestamps that may arrive as RFC 3339
/// instants or bare dates.
pub mod lenient {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::de::Error as _;
    use time::Date;
    use time::OffsetDateTime;

    use super::parse_timestamp;

    /// Deserializes an optional timestamp.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the text is not a timestamp or date.
    pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) if !text.trim().is_empty() => {
                parse_timestamp(&text).map(Some).map_err(D::Error::custom)
            }
            _ => Ok(None),
        }
    }

    /// Deserializes an optional calendar date, truncating timestamps to their date.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error when the text is not a timestamp or date.
    pub fn date<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(timestamp(deserializer)?.map(OffsetDateTime::date))
    }
}
