//! Storage gateway.
//!
//! [`Storage::open`] issues two capability-scoped handles over the same SQLite
//! file: a [`ReadHandle`] whose pool is opened read-only at the engine level,
//! and a [`WriteHandle`] exposing a fixed set of row writes. Nothing else in
//! the crate touches SQL.

pub mod read;
pub mod write;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::models::{
  parse_date, parse_timestamp, LogRecord, Plan, PlanRecord, ValidationError, WorkoutLog,
};

pub use read::{QueryResult, ReadHandle};
pub use write::WriteHandle;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CONNECTIONS: u32 = 4;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("Stored JSON is invalid: {0}")]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Query rejected: {0}")]
  ReadOnly(String),
}

impl Serialize for StorageError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Storage
/// ---------------------------------------------------------------------------

/// Both handles over one database file
#[derive(Debug, Clone)]
pub struct Storage {
  reader: ReadHandle,
  writer: WriteHandle,
}

impl Storage {
  /// Open (creating if needed) the database at `path` and run migrations.
  ///
  /// The write pool is opened first so the file and schema exist before the
  /// read-only pool connects.
  pub async fn open(path: &Path, max_rows: usize) -> Result<Self, StorageError> {
    info!("Opening database at: {}", path.display());

    let write_options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(BUSY_TIMEOUT);
    // A single writer connection serialises writes inside the process
    let write_pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(write_options)
      .await?;

    sqlx::migrate!("./migrations").run(&write_pool).await?;

    let reader = Self::open_reader(path, max_rows).await?;
    info!("Database ready");

    Ok(Self {
      reader,
      writer: WriteHandle::new(write_pool),
    })
  }

  /// Read-only pool; the file must already exist
  async fn open_reader(path: &Path, max_rows: usize) -> Result<ReadHandle, StorageError> {
    let read_options = SqliteConnectOptions::new()
      .filename(path)
      .read_only(true)
      .busy_timeout(BUSY_TIMEOUT);
    let read_pool = SqlitePoolOptions::new()
      .max_connections(READ_CONNECTIONS)
      .connect_with(read_options)
      .await?;
    Ok(ReadHandle::new(read_pool, max_rows))
  }

  pub fn reader(&self) -> ReadHandle {
    self.reader.clone()
  }

  pub fn writer(&self) -> WriteHandle {
    self.writer.clone()
  }

  pub async fn close(self) {
    self.reader.pool().close().await;
    self.writer.pool().close().await;
  }
}

/// ---------------------------------------------------------------------------
/// Row Decoding
/// ---------------------------------------------------------------------------

/// `(date, json, last_modified, last_modified_by)` as stored
pub(crate) type StoredRow = (String, String, String, Option<String>);

pub(crate) fn decode_plan_row(row: StoredRow) -> Result<PlanRecord, StorageError> {
  let (date, body, last_modified, last_modified_by) = row;
  let raw: serde_json::Value = serde_json::from_str(&body)?;
  Ok(PlanRecord {
    date: parse_date("date", &date)?,
    plan: Plan::from_json(&raw)?,
    last_modified: parse_timestamp("last_modified", &last_modified)?,
    last_modified_by,
  })
}

pub(crate) fn decode_log_row(row: StoredRow) -> Result<LogRecord, StorageError> {
  let (date, body, last_modified, last_modified_by) = row;
  let raw: serde_json::Value = serde_json::from_str(&body)?;
  Ok(LogRecord {
    date: parse_date("date", &date)?,
    log: WorkoutLog::from_json(&raw, "log")?,
    last_modified: parse_timestamp("last_modified", &last_modified)?,
    last_modified_by,
  })
}

pub(crate) fn date_range_check(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
  if end < start {
    return Err(ValidationError::new(
      "end_date",
      crate::models::date_key(end),
      "end_date is before start_date",
    ));
  }
  Ok(())
}
