//! Read-only tools. Everything here goes through a [`ReadHandle`].

use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::ToolError;
use crate::db::ReadHandle;
use crate::models::{date_key, parse_date, ValidationError};

pub const DEFAULT_SUMMARY_DAYS: u32 = 30;
pub const MAX_SUMMARY_DAYS: u32 = 365;
const SCHEDULE_LOOKAHEAD_WEEKS: i64 = 6;
const SUMMARY_RECENT_PLANS: usize = 7;

#[derive(Debug, Deserialize)]
pub struct DateRangeArgs {
  pub start_date: String,
  pub end_date: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionalRangeArgs {
  pub start_date: Option<String>,
  pub end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryArgs {
  #[serde(default = "default_summary_days")]
  pub days: u32,
}

fn default_summary_days() -> u32 {
  DEFAULT_SUMMARY_DAYS
}

#[derive(Debug, Deserialize)]
pub struct QueryArgs {
  pub sql: String,
  #[serde(default)]
  pub params: Vec<Value>,
}

fn today() -> NaiveDate {
  Utc::now().date_naive()
}

/// Plans in `[start_date, end_date]`, oldest first
pub async fn get_workout_plan(
  reader: &ReadHandle,
  start_date: &str,
  end_date: &str,
) -> Result<Value, ToolError> {
  let start = parse_date("start_date", start_date)?;
  let end = parse_date("end_date", end_date)?;
  let capped = reader.plans_in_range(start, end).await?;
  let plans: Vec<Value> = capped.items.iter().map(|r| r.to_tool_json()).collect();
  Ok(json!({
    "count": plans.len(),
    "truncated": capped.truncated,
    "plans": plans,
  }))
}

/// Logs in `[start_date, end_date]`, oldest first
pub async fn get_workout_logs(
  reader: &ReadHandle,
  start_date: &str,
  end_date: &str,
) -> Result<Value, ToolError> {
  let start = parse_date("start_date", start_date)?;
  let end = parse_date("end_date", end_date)?;
  let capped = reader.logs_in_range(start, end).await?;
  let logs: Vec<Value> = capped.items.iter().map(|r| r.to_tool_json()).collect();
  Ok(json!({
    "count": logs.len(),
    "truncated": capped.truncated,
    "logs": logs,
  }))
}

pub async fn list_scheduled_dates(
  reader: &ReadHandle,
  start_date: Option<&str>,
  end_date: Option<&str>,
) -> Result<Value, ToolError> {
  let start = match start_date.filter(|s| !s.trim().is_empty()) {
    Some(raw) => parse_date("start_date", raw)?,
    None => today(),
  };
  let end = match end_date.filter(|s| !s.trim().is_empty()) {
    Some(raw) => parse_date("end_date", raw)?,
    None => today() + Duration::weeks(SCHEDULE_LOOKAHEAD_WEEKS),
  };
  let capped = reader.scheduled_dates(start, end).await?;
  let dates: Vec<String> = capped.items.into_iter().map(date_key).collect();
  Ok(json!({
    "start_date": date_key(start),
    "end_date": date_key(end),
    "truncated": capped.truncated,
    "dates": dates,
  }))
}

/// Adherence over the last `days` days, up to and including today
pub async fn get_workout_summary(reader: &ReadHandle, days: u32) -> Result<Value, ToolError> {
  if days > MAX_SUMMARY_DAYS {
    return Err(
      ValidationError::new(
        "days",
        days.to_string(),
        format!("cannot exceed {}", MAX_SUMMARY_DAYS),
      )
      .into(),
    );
  }
  let end = today();
  let start = end - Duration::days(i64::from(days));

  let planned = reader.count_plans(start, end).await?;
  let completed = reader.count_logs(start, end).await?;
  let recent = reader.recent_plans(start, end, SUMMARY_RECENT_PLANS).await?;

  let mut exercise_types: BTreeMap<&'static str, usize> = BTreeMap::new();
  for record in &recent {
    for exercise in &record.plan.exercises {
      *exercise_types.entry(exercise.type_name()).or_default() += 1;
    }
  }

  Ok(json!({
    "analysis_period_days": days,
    "planned_workouts": planned,
    "completed_workouts": completed,
    "completion_rate_percent": completion_rate(planned, completed),
    "exercise_types_in_recent_plans": exercise_types,
    "recent_plan_dates": recent.iter().map(|r| date_key(r.date)).collect::<Vec<_>>(),
  }))
}

/// Percent to one decimal; 0 when nothing was planned
fn completion_rate(planned: i64, completed: i64) -> f64 {
  if planned <= 0 {
    return 0.0;
  }
  (completed as f64 / planned as f64 * 1000.0).round() / 10.0
}

/// Ad-hoc SELECT through the read-only pool
pub async fn query_database(
  reader: &ReadHandle,
  sql: &str,
  params: &[Value],
) -> Result<Value, ToolError> {
  let result = reader.query(sql, params).await?;
  Ok(json!({
    "columns": result.columns,
    "rows": result.rows,
    "row_count": result.row_count,
    "truncated": result.truncated,
    "max_rows": reader.max_rows(),
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::WorkoutLog;
  use crate::test_utils::{
    sample_log, sample_plan, setup_test_storage, setup_test_storage_with_max_rows,
  };
  use crate::assert_approx_eq;

  #[tokio::test]
  async fn test_empty_range_is_empty_not_error() {
    let (storage, _dir) = setup_test_storage().await;
    let result = get_workout_plan(&storage.reader(), "2026-02-01", "2026-02-07")
      .await
      .unwrap();
    assert_eq!(result["count"], json!(0));
    assert_eq!(result["plans"], json!([]));
    assert_eq!(result["truncated"], json!(false));
    storage.close().await;
  }

  #[tokio::test]
  async fn test_plan_range_filters_and_flags_truncation() {
    let (storage, _dir) = setup_test_storage_with_max_rows(2).await;
    let writer = storage.writer();
    for day in 1..=4 {
      let date = NaiveDate::from_ymd_opt(2026, 2, day).unwrap();
      writer.upsert_plan(date, &sample_plan(), "mcp").await.unwrap();
    }

    let result = get_workout_plan(&storage.reader(), "2026-02-01", "2026-02-03")
      .await
      .unwrap();
    assert_eq!(result["count"], json!(2));
    assert_eq!(result["truncated"], json!(true));
    assert_eq!(result["plans"][0]["date"], json!("2026-02-01"));

    let exact = get_workout_plan(&storage.reader(), "2026-02-04", "2026-02-04")
      .await
      .unwrap();
    assert_eq!(exact["truncated"], json!(false));
    storage.close().await;
  }

  #[tokio::test]
  async fn test_logs_are_returned_with_row_metadata() {
    let (storage, _dir) = setup_test_storage().await;
    let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
    storage
      .writer()
      .upsert_log(date, &sample_log(), "phone-1")
      .await
      .unwrap();

    let result = get_workout_logs(&storage.reader(), "2026-02-01", "2026-02-28")
      .await
      .unwrap();
    assert_eq!(result["count"], json!(1));
    assert_eq!(result["logs"][0]["last_modified_by"], json!("phone-1"));
    let log = WorkoutLog::from_json(&result["logs"][0]["log"], "log").unwrap();
    assert_eq!(log, sample_log());
    storage.close().await;
  }

  #[tokio::test]
  async fn test_invalid_date_names_field() {
    let (storage, _dir) = setup_test_storage().await;
    let err = get_workout_logs(&storage.reader(), "2026-02-01", "Feb 7")
      .await
      .unwrap_err();
    match err {
      ToolError::Validation(v) => assert_eq!(v.field, "end_date"),
      other => panic!("expected validation error, got {:?}", other),
    }
    storage.close().await;
  }

  #[tokio::test]
  async fn test_scheduled_dates_default_window() {
    let (storage, _dir) = setup_test_storage().await;
    let writer = storage.writer();
    let soon = today() + Duration::days(3);
    let far = today() + Duration::weeks(10);
    writer.upsert_plan(soon, &sample_plan(), "mcp").await.unwrap();
    writer.upsert_plan(far, &sample_plan(), "mcp").await.unwrap();

    let result = list_scheduled_dates(&storage.reader(), None, None).await.unwrap();
    assert_eq!(result["dates"], json!([date_key(soon)]));

    let wide = list_scheduled_dates(&storage.reader(), None, Some(&date_key(far)))
      .await
      .unwrap();
    assert_eq!(wide["dates"].as_array().unwrap().len(), 2);
    storage.close().await;
  }

  #[tokio::test]
  async fn test_summary_counts_and_rate() {
    let (storage, _dir) = setup_test_storage().await;
    let writer = storage.writer();
    for offset in 0..3 {
      let date = today() - Duration::days(offset);
      writer.upsert_plan(date, &sample_plan(), "mcp").await.unwrap();
    }
    writer.upsert_log(today(), &sample_log(), "phone").await.unwrap();

    let summary = get_workout_summary(&storage.reader(), 7).await.unwrap();
    assert_eq!(summary["planned_workouts"], json!(3));
    assert_eq!(summary["completed_workouts"], json!(1));
    assert_approx_eq!(summary["completion_rate_percent"].as_f64().unwrap(), 33.3, 1e-9);
    assert_eq!(summary["exercise_types_in_recent_plans"]["strength"], json!(3));
    assert_eq!(summary["exercise_types_in_recent_plans"]["checklist"], json!(3));
    assert_eq!(summary["recent_plan_dates"][0], json!(date_key(today())));
    storage.close().await;
  }

  #[tokio::test]
  async fn test_summary_rejects_long_window() {
    let (storage, _dir) = setup_test_storage().await;
    let err = get_workout_summary(&storage.reader(), 366).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    let empty = get_workout_summary(&storage.reader(), 365).await.unwrap();
    assert_eq!(empty["completion_rate_percent"], json!(0.0));
    storage.close().await;
  }

  #[tokio::test]
  async fn test_query_database_rejects_writes() {
    let (storage, _dir) = setup_test_storage().await;
    let err = query_database(&storage.reader(), "DELETE FROM workout_plans", &[])
      .await
      .unwrap_err();
    assert_eq!(err.kind(), "read_only");

    let ok = query_database(
      &storage.reader(),
      "SELECT COUNT(*) AS n FROM workout_plans WHERE date >= ?",
      &[json!("2026-01-01")],
    )
    .await
    .unwrap();
    assert_eq!(ok["rows"][0]["n"], json!(0));
    storage.close().await;
  }

  #[test]
  fn test_completion_rate_rounds_to_one_decimal() {
    assert_approx_eq!(completion_rate(3, 2), 66.7, 1e-9);
    assert_approx_eq!(completion_rate(0, 5), 0.0, 1e-9);
    assert_approx_eq!(completion_rate(4, 4), 100.0, 1e-9);
  }
}
