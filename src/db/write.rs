//! The write capability: a fixed set of row-level writes.
//!
//! Every write stamps `last_modified` with the current UTC time and records
//! who made it. Each call is its own transaction; nothing spans calls.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{decode_plan_row, StorageError, StoredRow};
use crate::models::{
  date_key, format_timestamp, parse_timestamp, utc_now, Client, Exercise, LogRecord, Plan,
  PlanRecord, WorkoutLog,
};

pub const LAST_SYNC_KEY: &str = "last_server_sync_time";

#[derive(Debug, Clone)]
pub struct WriteHandle {
  pool: SqlitePool,
}

impl WriteHandle {
  pub(crate) fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub(crate) fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  /// ---------------------------------------------------------------------------
  /// Plans
  /// ---------------------------------------------------------------------------

  /// Replace the whole plan for `date`
  pub async fn upsert_plan(
    &self,
    date: NaiveDate,
    plan: &Plan,
    by: &str,
  ) -> Result<PlanRecord, StorageError> {
    let now = utc_now();
    let mut tx = self.pool.begin().await?;
    store_plan(&mut tx, date, plan, by, now).await?;
    tx.commit().await?;
    info!(date = %date, by, exercises = plan.exercises.len(), "plan saved");

    Ok(PlanRecord {
      date,
      plan: plan.clone(),
      last_modified: now,
      last_modified_by: Some(by.to_string()),
    })
  }

  /// Returns false when there was no plan for `date`
  pub async fn delete_plan(&self, date: NaiveDate) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM workout_plans WHERE date = ?1")
      .bind(date_key(date))
      .execute(&self.pool)
      .await?;
    let deleted = result.rows_affected() > 0;
    info!(date = %date, deleted, "plan delete");
    Ok(deleted)
  }

  /// Merge plan-level fields (`day_name`, `location`, `phase`, extras)
  pub async fn patch_plan_fields(
    &self,
    date: NaiveDate,
    fields: &Map<String, Value>,
    by: &str,
  ) -> Result<PlanRecord, StorageError> {
    let (record, ()) = self
      .mutate_plan(date, by, |plan| Ok(plan.apply_metadata(fields)?))
      .await?;
    Ok(record)
  }

  /// Insert one exercise; returns the saved plan and the index used
  pub async fn insert_exercise(
    &self,
    date: NaiveDate,
    exercise: Exercise,
    position: Option<usize>,
    by: &str,
  ) -> Result<(PlanRecord, usize), StorageError> {
    self
      .mutate_plan(date, by, |plan| Ok(plan.insert_exercise(exercise, position)?))
      .await
  }

  pub async fn update_exercise(
    &self,
    date: NaiveDate,
    exercise_id: &str,
    fields: &Map<String, Value>,
    by: &str,
  ) -> Result<PlanRecord, StorageError> {
    let (record, ()) = self
      .mutate_plan(date, by, |plan| {
        if plan.update_exercise(exercise_id, fields)? {
          Ok(())
        } else {
          Err(missing_exercise(date, exercise_id))
        }
      })
      .await?;
    Ok(record)
  }

  /// Remove one exercise; returns the saved plan and what was removed
  pub async fn remove_exercise(
    &self,
    date: NaiveDate,
    exercise_id: &str,
    by: &str,
  ) -> Result<(PlanRecord, Exercise), StorageError> {
    self
      .mutate_plan(date, by, |plan| {
        plan
          .remove_exercise(exercise_id)
          .ok_or_else(|| missing_exercise(date, exercise_id))
      })
      .await
  }

  /// Read-modify-write of one plan row inside a single transaction
  async fn mutate_plan<R, F>(
    &self,
    date: NaiveDate,
    by: &str,
    change: F,
  ) -> Result<(PlanRecord, R), StorageError>
  where
    F: FnOnce(&mut Plan) -> Result<R, StorageError>,
  {
    let mut tx = self.pool.begin().await?;
    let row: Option<StoredRow> = sqlx::query_as(
      "SELECT date, plan_json, last_modified, last_modified_by FROM workout_plans WHERE date = ?1",
    )
    .bind(date_key(date))
    .fetch_optional(&mut *tx)
    .await?;
    let mut record = match row {
      Some(row) => decode_plan_row(row)?,
      None => return Err(StorageError::NotFound(format!("no plan for {}", date_key(date)))),
    };

    // Dropping `tx` on error rolls back
    let outcome = change(&mut record.plan)?;
    let now = utc_now();
    store_plan(&mut tx, date, &record.plan, by, now).await?;
    tx.commit().await?;
    debug!(date = %date, by, "plan updated in place");

    record.last_modified = now;
    record.last_modified_by = Some(by.to_string());
    Ok((record, outcome))
  }

  /// ---------------------------------------------------------------------------
  /// Logs
  /// ---------------------------------------------------------------------------

  /// Replace the whole log for `date` (no field merge)
  pub async fn upsert_log(
    &self,
    date: NaiveDate,
    log: &WorkoutLog,
    by: &str,
  ) -> Result<LogRecord, StorageError> {
    let now = utc_now();
    let mut tx = self.pool.begin().await?;
    store_log(&mut tx, date, log, by, now).await?;
    tx.commit().await?;
    Ok(LogRecord {
      date,
      log: log.clone(),
      last_modified: now,
      last_modified_by: Some(by.to_string()),
    })
  }

  /// Apply one client upload: touch the client, replace each log, advance
  /// the server sync time. All rows share one timestamp, which is returned.
  pub async fn apply_upload(
    &self,
    client_id: &str,
    default_name: &str,
    logs: &BTreeMap<NaiveDate, WorkoutLog>,
  ) -> Result<DateTime<Utc>, StorageError> {
    let now = utc_now();
    let mut tx = self.pool.begin().await?;
    upsert_client(&mut tx, client_id, None, default_name, now).await?;
    for (date, log) in logs {
      store_log(&mut tx, *date, log, client_id, now).await?;
    }
    set_meta(&mut tx, LAST_SYNC_KEY, &format_timestamp(now)).await?;
    tx.commit().await?;
    Ok(now)
  }

  /// ---------------------------------------------------------------------------
  /// Clients & Sync Metadata
  /// ---------------------------------------------------------------------------

  /// Create the client if new, otherwise bump `last_seen_at` (and rename if
  /// a name is given)
  pub async fn register_client(
    &self,
    client_id: &str,
    name: Option<&str>,
    default_name: &str,
  ) -> Result<Client, StorageError> {
    let mut tx = self.pool.begin().await?;
    let client = upsert_client(&mut tx, client_id, name, default_name, utc_now()).await?;
    tx.commit().await?;
    Ok(client)
  }

  /// Bump `last_seen_at` for a known client; false if unknown
  pub async fn touch_client(&self, client_id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE clients SET last_seen_at = ?1 WHERE id = ?2")
      .bind(format_timestamp(utc_now()))
      .bind(client_id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut tx = self.pool.begin().await?;
    set_meta(&mut tx, key, value).await?;
    tx.commit().await?;
    Ok(())
  }
}

fn missing_exercise(date: NaiveDate, exercise_id: &str) -> StorageError {
  StorageError::NotFound(format!(
    "no exercise '{}' in plan for {}",
    exercise_id,
    date_key(date)
  ))
}

async fn store_plan(
  tx: &mut Transaction<'_, Sqlite>,
  date: NaiveDate,
  plan: &Plan,
  by: &str,
  now: DateTime<Utc>,
) -> Result<(), StorageError> {
  sqlx::query(
    r#"
    INSERT INTO workout_plans (date, plan_json, last_modified, last_modified_by)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(date) DO UPDATE SET
      plan_json = excluded.plan_json,
      last_modified = excluded.last_modified,
      last_modified_by = excluded.last_modified_by
    "#,
  )
  .bind(date_key(date))
  .bind(serde_json::to_string(&plan.to_json())?)
  .bind(format_timestamp(now))
  .bind(by)
  .execute(&mut **tx)
  .await?;
  Ok(())
}

async fn store_log(
  tx: &mut Transaction<'_, Sqlite>,
  date: NaiveDate,
  log: &WorkoutLog,
  by: &str,
  now: DateTime<Utc>,
) -> Result<(), StorageError> {
  sqlx::query(
    r#"
    INSERT INTO workout_logs (date, log_json, last_modified, last_modified_by)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(date) DO UPDATE SET
      log_json = excluded.log_json,
      last_modified = excluded.last_modified,
      last_modified_by = excluded.last_modified_by
    "#,
  )
  .bind(date_key(date))
  .bind(serde_json::to_string(&log.to_json())?)
  .bind(format_timestamp(now))
  .bind(by)
  .execute(&mut **tx)
  .await?;
  Ok(())
}

async fn upsert_client(
  tx: &mut Transaction<'_, Sqlite>,
  client_id: &str,
  name: Option<&str>,
  default_name: &str,
  now: DateTime<Utc>,
) -> Result<Client, StorageError> {
  let (id, name, last_seen_at): (String, String, String) = sqlx::query_as(
    r#"
    INSERT INTO clients (id, name, last_seen_at)
    VALUES (?1, COALESCE(?2, ?3), ?4)
    ON CONFLICT(id) DO UPDATE SET
      name = COALESCE(?2, clients.name),
      last_seen_at = excluded.last_seen_at
    RETURNING id, name, last_seen_at
    "#,
  )
  .bind(client_id)
  .bind(name)
  .bind(default_name)
  .bind(format_timestamp(now))
  .fetch_one(&mut **tx)
  .await?;

  Ok(Client {
    id,
    name,
    last_seen_at: parse_timestamp("last_seen_at", &last_seen_at)?,
  })
}

async fn set_meta(
  tx: &mut Transaction<'_, Sqlite>,
  key: &str,
  value: &str,
) -> Result<(), StorageError> {
  sqlx::query(
    r#"
    INSERT INTO meta_sync (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value
    "#,
  )
  .bind(key)
  .bind(value)
  .execute(&mut **tx)
  .await?;
  Ok(())
}
