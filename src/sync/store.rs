//! On-device persistence for the sync client.
//!
//! State lives in a flat key-value store under four keys, each holding one
//! JSON document. [`SqliteStore`] keeps them in a single table; [`MemoryStore`]
//! is for tests and throwaway clients.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{date_key, parse_date, Plan, SyncMetadata, ValidationError, WorkoutLog};

pub const METADATA_KEY: &str = "coach_metadata";
pub const PLANS_KEY: &str = "workout_plans";
pub const LOGS_KEY: &str = "workout_logs";
pub const CLIENT_ID_KEY: &str = "coach_client_id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Local database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Local state is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  Validation(#[from] ValidationError),
}

impl Serialize for StoreError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// String key-value persistence
pub trait LocalStore: Send + Sync {
  fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

  /// Write every pair or none
  fn put_all(
    &self,
    entries: Vec<(&'static str, String)>,
  ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// ---------------------------------------------------------------------------
/// Stores
/// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LocalStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    Ok(self.entries.lock().await.get(key).cloned())
  }

  async fn put_all(&self, entries: Vec<(&'static str, String)>) -> Result<(), StoreError> {
    let mut map = self.entries.lock().await;
    for (key, value) in entries {
      map.insert(key.to_string(), value);
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub async fn open(path: &Path) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;
    sqlx::query(
      "CREATE TABLE IF NOT EXISTS local_state (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    )
    .execute(&pool)
    .await?;
    Ok(Self { pool })
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }
}

impl LocalStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM local_state WHERE key = ?1")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row.map(|(value,)| value))
  }

  async fn put_all(&self, entries: Vec<(&'static str, String)>) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    for (key, value) in entries {
      sqlx::query(
        "INSERT INTO local_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      )
      .bind(key)
      .bind(value)
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await?;
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Typed State
/// ---------------------------------------------------------------------------

/// Everything the client keeps between runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
  pub metadata: SyncMetadata,
  pub plans: BTreeMap<NaiveDate, Plan>,
  pub logs: BTreeMap<NaiveDate, WorkoutLog>,
}

impl LocalState {
  /// Load persisted state. A store with no client id gets a fresh one,
  /// written back immediately so it stays stable across runs.
  pub async fn load<S: LocalStore>(store: &S) -> Result<Self, StoreError> {
    let client_id = match store.get(CLIENT_ID_KEY).await? {
      Some(id) if !id.trim().is_empty() => id,
      _ => {
        let id = Uuid::new_v4().to_string();
        store.put_all(vec![(CLIENT_ID_KEY, id.clone())]).await?;
        id
      }
    };

    let mut metadata: SyncMetadata = match store.get(METADATA_KEY).await? {
      Some(raw) => serde_json::from_str(&raw)?,
      None => SyncMetadata::default(),
    };
    metadata.client_id = client_id;

    let mut plans = BTreeMap::new();
    for (date, body) in read_documents(store, PLANS_KEY).await? {
      plans.insert(date, Plan::from_json(&body)?);
    }
    let mut logs = BTreeMap::new();
    for (date, body) in read_documents(store, LOGS_KEY).await? {
      let field = format!("{}.{}", LOGS_KEY, date_key(date));
      logs.insert(date, WorkoutLog::from_json(&body, &field)?);
    }

    Ok(Self {
      metadata,
      plans,
      logs,
    })
  }

  pub fn client_id(&self) -> &str {
    &self.metadata.client_id
  }

  pub async fn save<S: LocalStore>(&self, store: &S) -> Result<(), StoreError> {
    store
      .put_all(vec![
        (METADATA_KEY, serde_json::to_string(&self.metadata)?),
        (PLANS_KEY, self.plans_document().to_string()),
        (LOGS_KEY, self.logs_document().to_string()),
      ])
      .await
  }

  pub async fn save_metadata<S: LocalStore>(&self, store: &S) -> Result<(), StoreError> {
    store
      .put_all(vec![(METADATA_KEY, serde_json::to_string(&self.metadata)?)])
      .await
  }

  /// Persist logs and metadata together, as a local edit touches both
  pub async fn save_logs<S: LocalStore>(&self, store: &S) -> Result<(), StoreError> {
    store
      .put_all(vec![
        (METADATA_KEY, serde_json::to_string(&self.metadata)?),
        (LOGS_KEY, self.logs_document().to_string()),
      ])
      .await
  }

  fn plans_document(&self) -> Value {
    Value::Object(
      self
        .plans
        .iter()
        .map(|(date, plan)| (date_key(*date), plan.to_json()))
        .collect::<Map<_, _>>(),
    )
  }

  fn logs_document(&self) -> Value {
    Value::Object(
      self
        .logs
        .iter()
        .map(|(date, log)| (date_key(*date), log.to_json()))
        .collect::<Map<_, _>>(),
    )
  }
}

async fn read_documents<S: LocalStore>(
  store: &S,
  key: &str,
) -> Result<Vec<(NaiveDate, Value)>, StoreError> {
  let Some(raw) = store.get(key).await? else {
    return Ok(Vec::new());
  };
  let value: Value = serde_json::from_str(&raw)?;
  let Value::Object(obj) = value else {
    return Err(ValidationError::for_value(key, &value, "expected an object keyed by date").into());
  };
  obj
    .into_iter()
    .map(|(raw_date, body)| Ok((parse_date(key, &raw_date)?, body)))
    .collect()
}
