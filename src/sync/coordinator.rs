//! Server side of log sync.
//!
//! Plans flow down only. Logs flow up and are stored whole, last write wins:
//! an upload replaces the stored log for each of its dates without looking at
//! what was there, even if another client wrote it and the uploader never saw
//! that version. Two devices editing the same date concurrently can therefore
//! lose one device's edits. This is accepted; logs are single-owner per date
//! in practice and there is no merge strategy.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::wire::{DownloadResponse, RegisterResponse, StatusResponse, UploadResponse};
use crate::db::write::LAST_SYNC_KEY;
use crate::db::{ReadHandle, StorageError, WriteHandle};
use crate::models::{
  date_key, format_timestamp, parse_date, utc_now, ValidationError, WorkoutLog,
};

pub const DEFAULT_FULL_SYNC_DAYS: i64 = 30;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

impl Serialize for CoordinatorError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// Default display name for a client that didn't give one
pub fn default_client_name(client_id: &str) -> String {
  let prefix: String = client_id.chars().take(8).collect();
  format!("Client-{}", prefix)
}

/// ---------------------------------------------------------------------------
/// Coordinator
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncCoordinator {
  reader: ReadHandle,
  writer: WriteHandle,
  full_sync_days: i64,
}

impl SyncCoordinator {
  pub fn new(reader: ReadHandle, writer: WriteHandle, full_sync_days: i64) -> Self {
    Self {
      reader,
      writer,
      full_sync_days: full_sync_days.max(0),
    }
  }

  /// Issue or confirm a client identity. Re-registering an existing id only
  /// refreshes `last_seen_at` (and the name, if one is given).
  pub async fn register(
    &self,
    client_id: Option<&str>,
    client_name: Option<&str>,
  ) -> Result<RegisterResponse, CoordinatorError> {
    let client_id = match client_id.map(str::trim) {
      Some(id) if !id.is_empty() => id.to_string(),
      _ => Uuid::new_v4().to_string(),
    };
    let name = client_name.map(str::trim).filter(|n| !n.is_empty());
    let client = self
      .writer
      .register_client(&client_id, name, &default_client_name(&client_id))
      .await?;
    info!(client_id = %client.id, name = %client.name, "client registered");

    Ok(RegisterResponse {
      status: "ok".into(),
      client_id: client.id,
      server_time: format_timestamp(client.last_seen_at),
    })
  }

  /// Plans and logs changed since `since`. Without a watermark, every plan
  /// and the logs of the last `full_sync_days` days.
  ///
  /// `server_time` is read before the queries run, so anything committed
  /// after it is picked up by the next download.
  pub async fn download(
    &self,
    client_id: &str,
    since: Option<DateTime<Utc>>,
  ) -> Result<DownloadResponse, CoordinatorError> {
    require_client_id(client_id)?;
    let server_time = utc_now();
    if !self.writer.touch_client(client_id).await? {
      debug!(client_id, "download from unregistered client");
    }

    let plan_rows = self.reader.plans_modified_since(since).await?;
    let log_rows = match since {
      Some(since) => self.reader.logs_modified_since(since).await?,
      None => self.reader.logs_from_date(self.full_sync_start()).await?,
    };

    let plans: BTreeMap<String, _> = plan_rows
      .iter()
      .map(|record| (date_key(record.date), record.to_sync_json()))
      .collect();
    let logs: BTreeMap<String, _> = log_rows
      .iter()
      .map(|record| (date_key(record.date), record.to_sync_json()))
      .collect();

    info!(
      client_id,
      full = since.is_none(),
      plans = plans.len(),
      logs = logs.len(),
      "download served"
    );
    Ok(DownloadResponse {
      plans,
      logs,
      server_time: format_timestamp(server_time),
    })
  }

  /// Store each uploaded log whole, stamped with the uploader's id.
  ///
  /// Every date and log is validated before anything is written; one bad
  /// entry rejects the whole upload. An unknown client is registered.
  pub async fn upload(
    &self,
    client_id: &str,
    logs: &BTreeMap<String, serde_json::Value>,
  ) -> Result<UploadResponse, CoordinatorError> {
    require_client_id(client_id)?;

    let mut parsed = BTreeMap::new();
    for (raw_date, body) in logs {
      let field = format!("logs.{}", raw_date);
      let date = parse_date(&field, raw_date)?;
      parsed.insert(date, WorkoutLog::from_json(body, &field)?);
    }

    let server_time = self
      .writer
      .apply_upload(client_id, &default_client_name(client_id), &parsed)
      .await?;
    let applied_logs: Vec<String> = parsed.keys().map(|d| date_key(*d)).collect();
    info!(client_id, applied = applied_logs.len(), "logs uploaded");

    Ok(UploadResponse {
      success: true,
      applied_logs,
      server_time: format_timestamp(server_time),
    })
  }

  /// When the server last accepted an upload
  pub async fn status(&self) -> Result<StatusResponse, CoordinatorError> {
    Ok(StatusResponse {
      last_sync_time: self.reader.meta(LAST_SYNC_KEY).await?,
    })
  }

  fn full_sync_start(&self) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(self.full_sync_days)
  }
}

fn require_client_id(client_id: &str) -> Result<(), ValidationError> {
  if client_id.trim().is_empty() {
    return Err(ValidationError::missing("client_id"));
  }
  Ok(())
}
