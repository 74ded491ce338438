use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;

use super::{date_range_check, decode_log_row, decode_plan_row, StorageError, StoredRow};
use crate::models::{date_key, format_timestamp, parse_timestamp, Client, LogRecord, PlanRecord};

/// Rows from a capped read, with a flag when more existed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capped<T> {
  pub items: Vec<T>,
  pub truncated: bool,
}

impl<T> Capped<T> {
  fn from_overfetch(mut items: Vec<T>, max_rows: usize) -> Self {
    let truncated = items.len() > max_rows;
    items.truncate(max_rows);
    Self { items, truncated }
  }
}

/// Result of an ad-hoc read query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
  pub columns: Vec<String>,
  pub rows: Vec<Map<String, Value>>,
  pub row_count: usize,
  pub truncated: bool,
}

/// Read capability. The pool is opened read-only, so nothing issued through
/// it can modify the database.
#[derive(Debug, Clone)]
pub struct ReadHandle {
  pool: SqlitePool,
  max_rows: usize,
}

impl ReadHandle {
  pub(crate) fn new(pool: SqlitePool, max_rows: usize) -> Self {
    Self {
      pool,
      max_rows: max_rows.max(1),
    }
  }

  pub(crate) fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  pub fn max_rows(&self) -> usize {
    self.max_rows
  }

  /// ---------------------------------------------------------------------------
  /// Ad-hoc Queries
  /// ---------------------------------------------------------------------------

  /// Run one parameterised SELECT, capped at `max_rows`
  pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StorageError> {
    let statement = validate_select(sql)?;
    let wrapped = format!("SELECT * FROM ({}) LIMIT {}", statement, self.max_rows + 1);
    debug!(params = params.len(), "running read query");

    let mut query = sqlx::query(&wrapped);
    for param in params {
      query = bind_json(query, param);
    }
    let rows = query.fetch_all(&self.pool).await?;

    let columns = rows
      .first()
      .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
      .unwrap_or_default();

    let mut decoded = Vec::with_capacity(rows.len().min(self.max_rows));
    for row in rows.iter().take(self.max_rows + 1) {
      decoded.push(row_to_json(row)?);
    }
    let capped = Capped::from_overfetch(decoded, self.max_rows);

    Ok(QueryResult {
      columns,
      row_count: capped.items.len(),
      rows: capped.items,
      truncated: capped.truncated,
    })
  }

  /// ---------------------------------------------------------------------------
  /// Plans
  /// ---------------------------------------------------------------------------

  pub async fn plan(&self, date: NaiveDate) -> Result<Option<PlanRecord>, StorageError> {
    let row: Option<StoredRow> = sqlx::query_as(
      "SELECT date, plan_json, last_modified, last_modified_by FROM workout_plans WHERE date = ?1",
    )
    .bind(date_key(date))
    .fetch_optional(&self.pool)
    .await?;
    row.map(decode_plan_row).transpose()
  }

  /// Plans with `start <= date <= end`, in date order
  pub async fn plans_in_range(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Capped<PlanRecord>, StorageError> {
    date_range_check(start, end)?;
    let rows: Vec<StoredRow> = sqlx::query_as(
      r#"
      SELECT date, plan_json, last_modified, last_modified_by
      FROM workout_plans
      WHERE date >= ?1 AND date <= ?2
      ORDER BY date
      LIMIT ?3
      "#,
    )
    .bind(date_key(start))
    .bind(date_key(end))
    .bind(self.overfetch_limit())
    .fetch_all(&self.pool)
    .await?;
    let records = rows.into_iter().map(decode_plan_row).collect::<Result<Vec<_>, _>>()?;
    Ok(Capped::from_overfetch(records, self.max_rows))
  }

  pub async fn scheduled_dates(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Capped<NaiveDate>, StorageError> {
    date_range_check(start, end)?;
    let rows: Vec<(String,)> = sqlx::query_as(
      "SELECT date FROM workout_plans WHERE date >= ?1 AND date <= ?2 ORDER BY date LIMIT ?3",
    )
    .bind(date_key(start))
    .bind(date_key(end))
    .bind(self.overfetch_limit())
    .fetch_all(&self.pool)
    .await?;
    let dates = rows
      .into_iter()
      .map(|(date,)| crate::models::parse_date("date", &date))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Capped::from_overfetch(dates, self.max_rows))
  }

  /// Most recent plans in a range, newest first
  pub async fn recent_plans(
    &self,
    start: NaiveDate,
    end: NaiveDate,
    limit: usize,
  ) -> Result<Vec<PlanRecord>, StorageError> {
    let rows: Vec<StoredRow> = sqlx::query_as(
      r#"
      SELECT date, plan_json, last_modified, last_modified_by
      FROM workout_plans
      WHERE date >= ?1 AND date <= ?2
      ORDER BY date DESC
      LIMIT ?3
      "#,
    )
    .bind(date_key(start))
    .bind(date_key(end))
    .bind(limit.min(self.max_rows) as i64)
    .fetch_all(&self.pool)
    .await?;
    rows.into_iter().map(decode_plan_row).collect()
  }

  pub async fn count_plans(&self, start: NaiveDate, end: NaiveDate) -> Result<i64, StorageError> {
    let count: i64 =
      sqlx::query_scalar("SELECT COUNT(*) FROM workout_plans WHERE date >= ?1 AND date <= ?2")
        .bind(date_key(start))
        .bind(date_key(end))
        .fetch_one(&self.pool)
        .await?;
    Ok(count)
  }

  /// Every plan modified after `since` (uncapped; feeds sync downloads)
  pub async fn plans_modified_since(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> Result<Vec<PlanRecord>, StorageError> {
    let rows: Vec<StoredRow> = match since {
      Some(since) => {
        sqlx::query_as(
          r#"
          SELECT date, plan_json, last_modified, last_modified_by
          FROM workout_plans
          WHERE last_modified > ?1
          ORDER BY date
          "#,
        )
        .bind(format_timestamp(since))
        .fetch_all(&self.pool)
        .await?
      }
      None => {
        sqlx::query_as(
          "SELECT date, plan_json, last_modified, last_modified_by FROM workout_plans ORDER BY date",
        )
        .fetch_all(&self.pool)
        .await?
      }
    };
    rows.into_iter().map(decode_plan_row).collect()
  }

  /// ---------------------------------------------------------------------------
  /// Logs
  /// ---------------------------------------------------------------------------

  pub async fn log(&self, date: NaiveDate) -> Result<Option<LogRecord>, StorageError> {
    let row: Option<StoredRow> = sqlx::query_as(
      "SELECT date, log_json, last_modified, last_modified_by FROM workout_logs WHERE date = ?1",
    )
    .bind(date_key(date))
    .fetch_optional(&self.pool)
    .await?;
    row.map(decode_log_row).transpose()
  }

  pub async fn logs_in_range(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Capped<LogRecord>, StorageError> {
    date_range_check(start, end)?;
    let rows: Vec<StoredRow> = sqlx::query_as(
      r#"
      SELECT date, log_json, last_modified, last_modified_by
      FROM workout_logs
      WHERE date >= ?1 AND date <= ?2
      ORDER BY date
      LIMIT ?3
      "#,
    )
    .bind(date_key(start))
    .bind(date_key(end))
    .bind(self.overfetch_limit())
    .fetch_all(&self.pool)
    .await?;
    let records = rows.into_iter().map(decode_log_row).collect::<Result<Vec<_>, _>>()?;
    Ok(Capped::from_overfetch(records, self.max_rows))
  }

  pub async fn count_logs(&self, start: NaiveDate, end: NaiveDate) -> Result<i64, StorageError> {
    let count: i64 =
      sqlx::query_scalar("SELECT COUNT(*) FROM workout_logs WHERE date >= ?1 AND date <= ?2")
        .bind(date_key(start))
        .bind(date_key(end))
        .fetch_one(&self.pool)
        .await?;
    Ok(count)
  }

  /// Logs modified after `since` (uncapped; feeds sync downloads)
  pub async fn logs_modified_since(
    &self,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRecord>, StorageError> {
    let rows: Vec<StoredRow> = sqlx::query_as(
      r#"
      SELECT date, log_json, last_modified, last_modified_by
      FROM workout_logs
      WHERE last_modified > ?1
      ORDER BY date
      "#,
    )
    .bind(format_timestamp(since))
    .fetch_all(&self.pool)
    .await?;
    rows.into_iter().map(decode_log_row).collect()
  }

  /// Logs dated on or after `from` (uncapped; feeds a full resync)
  pub async fn logs_from_date(&self, from: NaiveDate) -> Result<Vec<LogRecord>, StorageError> {
    let rows: Vec<StoredRow> = sqlx::query_as(
      r#"
      SELECT date, log_json, last_modified, last_modified_by
      FROM workout_logs
      WHERE date >= ?1
      ORDER BY date
      "#,
    )
    .bind(date_key(from))
    .fetch_all(&self.pool)
    .await?;
    rows.into_iter().map(decode_log_row).collect()
  }

  /// ---------------------------------------------------------------------------
  /// Clients & Sync Metadata
  /// ---------------------------------------------------------------------------

  pub async fn client(&self, id: &str) -> Result<Option<Client>, StorageError> {
    let row: Option<(String, String, String)> =
      sqlx::query_as("SELECT id, name, last_seen_at FROM clients WHERE id = ?1")
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
    match row {
      Some((id, name, last_seen_at)) => Ok(Some(Client {
        id,
        name,
        last_seen_at: parse_timestamp("last_seen_at", &last_seen_at)?,
      })),
      None => Ok(None),
    }
  }

  pub async fn meta(&self, key: &str) -> Result<Option<String>, StorageError> {
    let value: Option<Option<String>> =
      sqlx::query_scalar("SELECT value FROM meta_sync WHERE key = ?1")
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
    Ok(value.flatten())
  }

  fn overfetch_limit(&self) -> i64 {
    i64::try_from(self.max_rows + 1).unwrap_or(i64::MAX)
  }
}

/// Accept exactly one SELECT (or WITH ... SELECT) statement
fn validate_select(sql: &str) -> Result<String, StorageError> {
  let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
  if statement.is_empty() {
    return Err(StorageError::ReadOnly("empty query".into()));
  }
  if statement.contains(';') {
    return Err(StorageError::ReadOnly(
      "only a single statement is allowed".into(),
    ));
  }
  let first_word = statement
    .split_whitespace()
    .next()
    .unwrap_or_default()
    .to_uppercase();
  if first_word != "SELECT" && first_word != "WITH" {
    return Err(StorageError::ReadOnly(
      "only SELECT queries are allowed".into(),
    ));
  }
  Ok(statement.to_string())
}

fn bind_json<'q>(
  query: Query<'q, Sqlite, SqliteArguments<'q>>,
  value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
  match value {
    Value::Null => query.bind(None::<String>),
    Value::Bool(b) => query.bind(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => query.bind(i),
      None => query.bind(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => query.bind(s.clone()),
    other => query.bind(other.to_string()),
  }
}

fn row_to_json(row: &SqliteRow) -> Result<Map<String, Value>, StorageError> {
  let mut obj = Map::new();
  for column in row.columns() {
    let index = column.ordinal();
    obj.insert(column.name().to_string(), cell_to_json(row, index)?);
  }
  Ok(obj)
}

/// Decode by the value's storage class, not the declared column type
fn cell_to_json(row: &SqliteRow, index: usize) -> Result<Value, StorageError> {
  let storage_class = {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
      return Ok(Value::Null);
    }
    raw.type_info().name().to_uppercase()
  };
  let value = match storage_class.as_str() {
    "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
    "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
      let float = row.try_get_unchecked::<f64, _>(index)?;
      Number::from_f64(float).map(Value::Number).unwrap_or(Value::Null)
    }
    "BLOB" => {
      let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
      Value::String(format!("<{} bytes>", bytes.len()))
    }
    _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
  };
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{sample_plan, setup_test_storage, setup_test_storage_with_max_rows};
  use serde_json::json;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
  }

  #[test]
  fn test_validate_select_accepts_select_and_cte() {
    assert!(validate_select("SELECT 1;").is_ok());
    assert!(validate_select("  with x as (select 1) select * from x").is_ok());
  }

  #[test]
  fn test_validate_select_rejects_writes_and_batches() {
    assert!(matches!(
      validate_select("DELETE FROM workout_plans"),
      Err(StorageError::ReadOnly(_))
    ));
    assert!(matches!(
      validate_select("SELECT 1; DROP TABLE clients"),
      Err(StorageError::ReadOnly(_))
    ));
    assert!(matches!(validate_select("  ;"), Err(StorageError::ReadOnly(_))));
  }

  #[tokio::test]
  async fn test_query_binds_params_and_decodes_types() {
    let (storage, _dir) = setup_test_storage().await;
    let result = storage
      .reader()
      .query("SELECT ?1 AS n, ?2 AS f, ?3 AS s, ?4 AS missing", &[json!(7), json!(1.5), json!("x"), Value::Null])
      .await
      .unwrap();
    assert_eq!(result.columns, vec!["n", "f", "s", "missing"]);
    let row = &result.rows[0];
    assert_eq!(row["n"], json!(7));
    assert_eq!(row["f"], json!(1.5));
    assert_eq!(row["s"], json!("x"));
    assert_eq!(row["missing"], Value::Null);
    assert!(!result.truncated);
    storage.close().await;
  }

  #[tokio::test]
  async fn test_query_signals_truncation() {
    let (storage, _dir) = setup_test_storage_with_max_rows(3).await;
    let writer = storage.writer();
    for d in 1..=5 {
      writer.upsert_plan(day(d), &sample_plan(), "mcp").await.unwrap();
    }
    let reader = storage.reader();

    let result = reader.query("SELECT date FROM workout_plans ORDER BY date", &[]).await.unwrap();
    assert_eq!(result.row_count, 3);
    assert!(result.truncated);

    let plans = reader.plans_in_range(day(1), day(28)).await.unwrap();
    assert_eq!(plans.items.len(), 3);
    assert!(plans.truncated);

    let exact = reader.plans_in_range(day(1), day(3)).await.unwrap();
    assert_eq!(exact.items.len(), 3);
    assert!(!exact.truncated);
    storage.close().await;
  }

  #[tokio::test]
  async fn test_write_sql_rejected_before_reaching_database() {
    let (storage, _dir) = setup_test_storage().await;
    let err = storage
      .reader()
      .query("UPDATE workout_plans SET plan_json = '{}'", &[])
      .await
      .unwrap_err();
    assert!(matches!(err, StorageError::ReadOnly(_)));
    storage.close().await;
  }

  #[tokio::test]
  async fn test_modified_since_filters_by_watermark() {
    let (storage, _dir) = setup_test_storage().await;
    let writer = storage.writer();
    writer.upsert_plan(day(1), &sample_plan(), "mcp").await.unwrap();
    let watermark = crate::models::utc_now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    writer.upsert_plan(day(2), &sample_plan(), "mcp").await.unwrap();

    let reader = storage.reader();
    let changed = reader.plans_modified_since(Some(watermark)).await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].date, day(2));
    assert_eq!(reader.plans_modified_since(None).await.unwrap().len(), 2);
    storage.close().await;
  }
}
