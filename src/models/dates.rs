//! Date keys and UTC timestamps as they appear on the wire and in storage.
//!
//! Timestamps are always written with microsecond precision and a `Z`
//! suffix so that string comparison in SQL matches chronological order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};

use super::validation::ValidationError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ValidationError> {
  NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
    ValidationError::new(field, raw, "invalid date format, use YYYY-MM-DD")
  })
}

/// Canonical storage key for a date
pub fn date_key(date: NaiveDate) -> String {
  date.format(DATE_FORMAT).to_string()
}

/// Current time, truncated to what survives a storage round trip
pub fn utc_now() -> DateTime<Utc> {
  let now = Utc::now();
  now
    .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
    .unwrap_or(now)
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, ValidationError> {
  let trimmed = raw.trim();
  if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
    return Ok(ts.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
    .map(|naive| naive.and_utc())
    .map_err(|_| ValidationError::new(field, raw, "expected an ISO-8601 timestamp"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_date_accepts_iso() {
    let date = parse_date("date", "2026-02-02").unwrap();
    assert_eq!(date_key(date), "2026-02-02");
  }

  #[test]
  fn test_parse_date_rejects_us_format() {
    let err = parse_date("date", "02-02-2026").unwrap_err();
    assert!(err.reason.contains("invalid date format"));
    assert_eq!(err.value, "02-02-2026");
  }

  #[test]
  fn test_timestamps_round_trip() {
    let now = utc_now();
    let text = format_timestamp(now);
    assert!(text.ends_with('Z'));
    assert!(text.contains('T'));
    assert_eq!(parse_timestamp("ts", &text).unwrap(), now);
  }

  #[test]
  fn test_naive_timestamp_is_utc() {
    let ts = parse_timestamp("ts", "2026-02-02T08:30:00.5").unwrap();
    assert_eq!(format_timestamp(ts), "2026-02-02T08:30:00.500000Z");
  }

  #[test]
  fn test_formatted_timestamps_sort_chronologically() {
    let early = parse_timestamp("ts", "2026-02-02T09:59:59.999999Z").unwrap();
    let late = parse_timestamp("ts", "2026-02-02T10:00:00Z").unwrap();
    assert!(format_timestamp(early) < format_timestamp(late));
  }
}
