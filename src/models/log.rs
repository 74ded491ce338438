//! Workout logs: what was actually performed on a date.
//!
//! A log is kind-agnostic storage keyed by exercise id. It never checks itself
//! against the plan for the same date; [`WorkoutLog::result_for`] gives a typed
//! view once the caller has the matching [`Exercise`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::dates::{format_timestamp, parse_timestamp};
use super::exercise::{Exercise, ExerciseKind};
use super::validation::{optional_string, ValidationError};

pub const SESSION_FEEDBACK_KEY: &str = "session_feedback";
const MODIFIED_AT_KEY: &str = "_last_modified_at";
const MODIFIED_BY_KEY: &str = "_last_modified_by";
/// Row timestamp added to downloads; never stored inside the log body
const ROW_STAMP_KEY: &str = "_lastModified";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pain_discomfort: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub general_notes: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// ---------------------------------------------------------------------------
/// Typed Results
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResult {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub set_num: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weight: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reps: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rpe: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_sec: Option<u32>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetsResult {
  #[serde(default)]
  pub completed: Option<bool>,
  #[serde(default)]
  pub sets: Vec<SetResult>,
  #[serde(default)]
  pub user_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChecklistResult {
  #[serde(default)]
  pub completed_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DurationResult {
  #[serde(default)]
  pub completed: Option<bool>,
  #[serde(default)]
  pub duration_min: Option<f64>,
  #[serde(default)]
  pub avg_hr: Option<u32>,
  #[serde(default)]
  pub max_hr: Option<u32>,
}

/// A log entry read according to the kind of exercise it answers
#[derive(Debug, Clone, PartialEq)]
pub enum ExerciseResult {
  Sets(SetsResult),
  Checklist(ChecklistResult),
  Duration(DurationResult),
  /// Entry whose shape doesn't match its exercise kind, kept raw
  Other(Map<String, Value>),
}

impl ExerciseResult {
  fn read(kind: &ExerciseKind, entry: &Map<String, Value>) -> Self {
    let raw = Value::Object(entry.clone());
    let typed = match kind {
      ExerciseKind::Strength { .. }
      | ExerciseKind::Circuit { .. }
      | ExerciseKind::WeightedTime { .. } => serde_json::from_value(raw).map(Self::Sets).ok(),
      ExerciseKind::Checklist { .. } => serde_json::from_value(raw).map(Self::Checklist).ok(),
      ExerciseKind::Duration { .. } => serde_json::from_value(raw).map(Self::Duration).ok(),
      ExerciseKind::Interval { .. } => None,
    };
    typed.unwrap_or_else(|| Self::Other(entry.clone()))
  }
}

/// ---------------------------------------------------------------------------
/// Workout Log
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct WorkoutLog {
  pub session_feedback: Option<SessionFeedback>,
  /// Exercise id → result fields
  pub entries: BTreeMap<String, Map<String, Value>>,
  pub last_modified_at: Option<DateTime<Utc>>,
  pub last_modified_by: Option<String>,
  /// Other underscore-prefixed client bookkeeping, passed through
  pub annotations: Map<String, Value>,
}

impl WorkoutLog {
  pub fn from_json(value: &Value, path: &str) -> Result<Self, ValidationError> {
    let obj = value
      .as_object()
      .ok_or_else(|| ValidationError::for_value(path, value, "log must be an object"))?;

    let mut log = Self::default();
    for (key, item) in obj {
      let field = format!("{}.{}", path, key);
      match key.as_str() {
        SESSION_FEEDBACK_KEY => {
          if !item.is_null() {
            let feedback = serde_json::from_value(item.clone())
              .map_err(|e| ValidationError::for_value(field, item, e.to_string()))?;
            log.session_feedback = Some(feedback);
          }
        }
        MODIFIED_AT_KEY => {
          log.last_modified_at = match item {
            Value::Null => None,
            Value::String(raw) => Some(parse_timestamp(&field, raw)?),
            other => return Err(ValidationError::for_value(field, other, "expected a timestamp")),
          };
        }
        MODIFIED_BY_KEY => log.last_modified_by = optional_string(obj, key, path)?,
        ROW_STAMP_KEY => {}
        other if other.starts_with('_') => {
          log.annotations.insert(other.to_string(), item.clone());
        }
        other => match item {
          Value::Object(entry) => {
            log.entries.insert(other.to_string(), entry.clone());
          }
          bad => {
            return Err(ValidationError::for_value(field, bad, "exercise result must be an object"));
          }
        },
      }
    }
    Ok(log)
  }

  pub fn to_json(&self) -> Value {
    let mut obj = Map::new();
    for (key, value) in &self.annotations {
      obj.insert(key.clone(), value.clone());
    }
    for (id, entry) in &self.entries {
      obj.insert(id.clone(), Value::Object(entry.clone()));
    }
    if let Some(feedback) = &self.session_feedback {
      if let Ok(value) = serde_json::to_value(feedback) {
        obj.insert(SESSION_FEEDBACK_KEY.into(), value);
      }
    }
    if let Some(at) = self.last_modified_at {
      obj.insert(MODIFIED_AT_KEY.into(), Value::String(format_timestamp(at)));
    }
    if let Some(by) = &self.last_modified_by {
      obj.insert(MODIFIED_BY_KEY.into(), Value::String(by.clone()));
    }
    Value::Object(obj)
  }

  pub fn entry(&self, exercise_id: &str) -> Option<&Map<String, Value>> {
    self.entries.get(exercise_id)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty() && self.session_feedback.is_none()
  }

  /// Field-merge `patch` into one exercise's result (or the session feedback).
  /// A `null` value removes that field.
  pub fn merge_result(
    &mut self,
    exercise_id: &str,
    patch: &Map<String, Value>,
  ) -> Result<(), ValidationError> {
    if exercise_id.trim().is_empty() {
      return Err(ValidationError::new("exercise_id", exercise_id, "must not be empty"));
    }
    if exercise_id.starts_with('_') {
      return Err(ValidationError::new(
        "exercise_id",
        exercise_id,
        "underscore-prefixed keys are reserved for bookkeeping",
      ));
    }

    if exercise_id == SESSION_FEEDBACK_KEY {
      let mut current = self
        .session_feedback
        .as_ref()
        .and_then(|f| serde_json::to_value(f).ok())
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
      merge_fields(&mut current, patch);
      let merged = Value::Object(current);
      let feedback = serde_json::from_value(merged.clone()).map_err(|e| {
        ValidationError::for_value(SESSION_FEEDBACK_KEY, &merged, e.to_string())
      })?;
      self.session_feedback = Some(feedback);
      return Ok(());
    }

    let entry = self.entries.entry(exercise_id.to_string()).or_default();
    merge_fields(entry, patch);
    Ok(())
  }

  /// Stamp a local edit
  pub fn touch(&mut self, by: &str, at: DateTime<Utc>) {
    self.last_modified_at = Some(at);
    self.last_modified_by = Some(by.to_string());
  }

  /// Typed view of the entry answering `exercise`
  pub fn result_for(&self, exercise: &Exercise) -> Option<ExerciseResult> {
    self
      .entries
      .get(&exercise.id)
      .map(|entry| ExerciseResult::read(&exercise.kind, entry))
  }
}

fn merge_fields(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
  for (key, value) in patch {
    if value.is_null() {
      target.remove(key);
    } else {
      target.insert(key.clone(), value.clone());
    }
  }
}

impl TryFrom<Value> for WorkoutLog {
  type Error = ValidationError;
  fn try_from(value: Value) -> Result<Self, Self::Error> {
    Self::from_json(&value, "log")
  }
}

impl From<WorkoutLog> for Value {
  fn from(log: WorkoutLog) -> Self {
    log.to_json()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Plan;
  use crate::test_utils::{sample_log_json, sample_plan_json};
  use serde_json::json;

  #[test]
  fn test_sample_log_round_trips() {
    let raw = sample_log_json();
    let log = WorkoutLog::from_json(&raw, "log").unwrap();
    assert_eq!(log.entries.len(), 3);
    assert_eq!(
      log.session_feedback.as_ref().unwrap().pain_discomfort.as_deref(),
      Some("None")
    );
    assert_eq!(log.to_json(), raw);
  }

  #[test]
  fn test_feedback_only_log_is_valid() {
    let log = WorkoutLog::from_json(
      &json!({"session_feedback": {"pain_discomfort": "Minor knee ache"}}),
      "log",
    )
    .unwrap();
    assert!(log.entries.is_empty());
    assert!(!log.is_empty());
  }

  #[test]
  fn test_non_object_entry_rejected() {
    let err = WorkoutLog::from_json(&json!({"ex_1": 5}), "logs.2026-02-02").unwrap_err();
    assert_eq!(err.field, "logs.2026-02-02.ex_1");
  }

  #[test]
  fn test_row_stamp_is_dropped() {
    let log = WorkoutLog::from_json(
      &json!({"ex_1": {"completed": true}, "_lastModified": "2026-02-02T00:00:00Z"}),
      "log",
    )
    .unwrap();
    assert!(log.to_json().get("_lastModified").is_none());
  }

  #[test]
  fn test_bookkeeping_round_trips() {
    let at = crate::models::utc_now();
    let mut log = WorkoutLog::default();
    log.touch("client-a", at);
    let back = WorkoutLog::from_json(&log.to_json(), "log").unwrap();
    assert_eq!(back.last_modified_at, Some(at));
    assert_eq!(back.last_modified_by.as_deref(), Some("client-a"));
  }

  #[test]
  fn test_merge_result_is_field_merge() {
    let mut log = WorkoutLog::from_json(&sample_log_json(), "log").unwrap();
    let patch = json!({"user_note": "Grip gave out", "completed": null});
    log.merge_result("ex_1", patch.as_object().unwrap()).unwrap();
    let entry = log.entry("ex_1").unwrap();
    assert_eq!(entry["user_note"], "Grip gave out");
    assert!(entry.get("completed").is_none());
    assert_eq!(entry["sets"].as_array().unwrap().len(), 3);
  }

  #[test]
  fn test_merge_into_session_feedback() {
    let mut log = WorkoutLog::from_json(&sample_log_json(), "log").unwrap();
    let patch = json!({"general_notes": "Short on time"});
    log.merge_result(SESSION_FEEDBACK_KEY, patch.as_object().unwrap()).unwrap();
    let feedback = log.session_feedback.unwrap();
    assert_eq!(feedback.general_notes.as_deref(), Some("Short on time"));
    assert_eq!(feedback.pain_discomfort.as_deref(), Some("None"));
  }

  #[test]
  fn test_reserved_keys_rejected() {
    let mut log = WorkoutLog::default();
    let patch = json!({"x": 1});
    assert!(log.merge_result("_last_modified_at", patch.as_object().unwrap()).is_err());
  }

  #[test]
  fn test_results_typed_by_exercise_kind() {
    let plan = Plan::from_json(&sample_plan_json()).unwrap();
    let log = WorkoutLog::from_json(&sample_log_json(), "log").unwrap();

    match log.result_for(plan.exercise("ex_1").unwrap()) {
      Some(ExerciseResult::Sets(result)) => {
        assert_eq!(result.sets.len(), 3);
        assert_eq!(result.sets[1].rpe, Some(7.5));
      }
      other => panic!("expected sets, got {:?}", other),
    }
    match log.result_for(plan.exercise("warmup_1").unwrap()) {
      Some(ExerciseResult::Checklist(result)) => assert_eq!(result.completed_items.len(), 2),
      other => panic!("expected checklist, got {:?}", other),
    }
    match log.result_for(plan.exercise("cardio_1").unwrap()) {
      Some(ExerciseResult::Duration(result)) => assert_eq!(result.avg_hr, Some(142)),
      other => panic!("expected duration, got {:?}", other),
    }
  }

  #[test]
  fn test_mismatched_shape_falls_back_to_other() {
    let plan = Plan::from_json(&sample_plan_json()).unwrap();
    let log = WorkoutLog::from_json(&json!({"ex_1": {"sets": "three"}}), "log").unwrap();
    assert!(matches!(
      log.result_for(plan.exercise("ex_1").unwrap()),
      Some(ExerciseResult::Other(_))
    ));
  }
}
