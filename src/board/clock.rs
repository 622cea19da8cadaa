//! Timestamp helpers. Every instant the board stores is an RFC 3339 UTC
//! string with millisecond precision, so lexical order is time order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now() -> String {
    format_instant(Utc::now())
}

/// Parse a client-supplied instant: full RFC 3339, or a bare `YYYY-MM-DD`
/// date taken as midnight UTC.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("Invalid ISO-8601 date: '{}'", value))
}

/// Parse and re-render in the canonical storage format.
pub fn normalize_instant(value: &str) -> Result<String> {
    parse_instant(value).map(format_instant)
}
