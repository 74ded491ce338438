//! Plan-editing tools. Every write is stamped with [`TOOL_ACTOR`].

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{ToolError, TOOL_ACTOR};
use crate::db::WriteHandle;
use crate::models::{date_key, format_timestamp, parse_date, Exercise, Plan};

#[derive(Debug, Deserialize)]
pub struct DateArgs {
  pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPlanArgs {
  pub date: String,
  pub plan: Value,
}

#[derive(Debug, Deserialize)]
pub struct MetadataArgs {
  pub date: String,
  pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct AddExerciseArgs {
  pub date: String,
  pub exercise: Value,
  pub position: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExerciseArgs {
  pub date: String,
  pub exercise_id: String,
  pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExerciseRefArgs {
  pub date: String,
  pub exercise_id: String,
}

/// Create or fully replace the plan for `date`
pub async fn set_workout_plan(
  writer: &WriteHandle,
  date: &str,
  plan: &Value,
) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let plan = Plan::from_json(plan)?;
  let record = writer.upsert_plan(date, &plan, TOOL_ACTOR).await?;
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "last_modified": format_timestamp(record.last_modified),
    "plan": record.plan.to_json(),
    "message": format!("Workout plan for {} saved", date_key(date)),
  }))
}

pub async fn delete_workout_plan(writer: &WriteHandle, date: &str) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let deleted = writer.delete_plan(date).await?;
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "deleted": deleted,
  }))
}

pub async fn update_plan_metadata(
  writer: &WriteHandle,
  date: &str,
  fields: &Map<String, Value>,
) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let record = writer.patch_plan_fields(date, fields, TOOL_ACTOR).await?;
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "last_modified": format_timestamp(record.last_modified),
    "plan": record.plan.to_json(),
  }))
}

/// Insert one exercise; `position` past the end appends
pub async fn add_exercise(
  writer: &WriteHandle,
  date: &str,
  exercise: &Value,
  position: Option<usize>,
) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let exercise = Exercise::from_json(exercise, "exercise")?;
  let (record, index) = writer
    .insert_exercise(date, exercise, position, TOOL_ACTOR)
    .await?;
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "position": index,
    "exercise": record.plan.exercises.get(index).map(Exercise::to_json),
    "exercise_count": record.plan.exercises.len(),
    "last_modified": format_timestamp(record.last_modified),
  }))
}

pub async fn update_exercise(
  writer: &WriteHandle,
  date: &str,
  exercise_id: &str,
  fields: &Map<String, Value>,
) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let record = writer
    .update_exercise(date, exercise_id, fields, TOOL_ACTOR)
    .await?;
  // The update may have renamed the exercise
  let current_id = fields
    .get("id")
    .and_then(Value::as_str)
    .unwrap_or(exercise_id);
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "exercise": record.plan.exercise(current_id).map(Exercise::to_json),
    "last_modified": format_timestamp(record.last_modified),
  }))
}

pub async fn remove_exercise(
  writer: &WriteHandle,
  date: &str,
  exercise_id: &str,
) -> Result<Value, ToolError> {
  let date = parse_date("date", date)?;
  let (record, removed) = writer.remove_exercise(date, exercise_id, TOOL_ACTOR).await?;
  Ok(json!({
    "success": true,
    "date": date_key(date),
    "removed": removed.to_json(),
    "exercise_count": record.plan.exercises.len(),
    "last_modified": format_timestamp(record.last_modified),
  }))
}
