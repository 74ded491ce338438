use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::dates::{date_key, format_timestamp};
use super::log::WorkoutLog;

/// Client-side sync bookkeeping.
///
/// Persisted under `coach_metadata`; the client id lives under its own key
/// and is never part of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
  #[serde(skip)]
  pub client_id: String,
  /// `None` means the next download is a full resync
  #[serde(default)]
  pub last_server_sync_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub dirty_dates: BTreeSet<NaiveDate>,
}

impl SyncMetadata {
  pub fn new(client_id: impl Into<String>) -> Self {
    Self {
      client_id: client_id.into(),
      ..Self::default()
    }
  }

  pub fn mark_dirty(&mut self, date: NaiveDate) {
    self.dirty_dates.insert(date);
  }

  pub fn is_dirty(&self, date: NaiveDate) -> bool {
    self.dirty_dates.contains(&date)
  }
}

/// A registered sync client (server side)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
  pub id: String,
  pub name: String,
  pub last_seen_at: DateTime<Utc>,
}

/// A stored log row
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
  pub date: NaiveDate,
  pub log: WorkoutLog,
  pub last_modified: DateTime<Utc>,
  pub last_modified_by: Option<String>,
}

impl LogRecord {
  pub fn to_tool_json(&self) -> Value {
    json!({
      "date": date_key(self.date),
      "last_modified": format_timestamp(self.last_modified),
      "last_modified_by": self.last_modified_by,
      "log": self.log.to_json(),
    })
  }

  /// Log body with the row timestamp inline, as sent to clients
  pub fn to_sync_json(&self) -> Value {
    let mut body = self.log.to_json();
    if let Value::Object(obj) = &mut body {
      obj.insert(
        "_lastModified".into(),
        Value::String(format_timestamp(self.last_modified)),
      );
    }
    body
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_metadata_serializes_without_client_id() {
    let mut meta = SyncMetadata::new("abc-123");
    meta.mark_dirty(NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
    let value = serde_json::to_value(&meta).unwrap();
    assert!(value.get("clientId").is_none());
    assert_eq!(value["dirtyDates"], serde_json::json!(["2026-02-02"]));
    assert_eq!(value["lastServerSyncTime"], Value::Null);
  }

  #[test]
  fn test_metadata_defaults_when_fields_missing() {
    let meta: SyncMetadata = serde_json::from_str("{}").unwrap();
    assert!(meta.last_server_sync_time.is_none());
    assert!(meta.dirty_dates.is_empty());
  }

  #[test]
  fn test_dirty_dates_deduplicate() {
    let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
    let mut meta = SyncMetadata::default();
    meta.mark_dirty(date);
    meta.mark_dirty(date);
    assert_eq!(meta.dirty_dates.len(), 1);
    assert!(meta.is_dirty(date));
  }
}
