use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::debug;

use super::dates::{date_key, format_timestamp};
use super::exercise::Exercise;
use super::validation::{optional_string, ValidationError};

const METADATA_FIELDS: [&str; 3] = ["day_name", "location", "phase"];

/// Bookkeeping keys that belong to the stored row, not the plan body
const RECORD_FIELDS: [&str; 4] = ["date", "last_modified", "last_modified_by", "_lastModified"];

/// One day's intended workout, as authored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Plan {
  pub day_name: Option<String>,
  pub location: Option<String>,
  pub phase: Option<String>,
  /// Display and execution order
  pub exercises: Vec<Exercise>,
  pub extra: Map<String, Value>,
}

impl Plan {
  pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
    let obj = value
      .as_object()
      .ok_or_else(|| ValidationError::for_value("plan", value, "plan must be an object"))?;

    let exercises = match obj.get("exercises") {
      Some(Value::Array(items)) => items
        .iter()
        .enumerate()
        .map(|(i, item)| Exercise::from_json(item, &format!("exercises[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?,
      Some(other) => {
        return Err(ValidationError::for_value("exercises", other, "plan exercises must be a list"));
      }
      None => return Err(ValidationError::missing("exercises")),
    };
    check_unique_ids(&exercises)?;

    let dropped: Vec<&str> = RECORD_FIELDS
      .iter()
      .copied()
      .filter(|key| obj.contains_key(*key))
      .collect();
    if !dropped.is_empty() {
      debug!(fields = ?dropped, "ignoring row bookkeeping fields in plan body");
    }

    let extra = obj
      .iter()
      .filter(|(key, _)| {
        let key = key.as_str();
        key != "exercises" && !METADATA_FIELDS.contains(&key) && !RECORD_FIELDS.contains(&key)
      })
      .map(|(key, v)| (key.clone(), v.clone()))
      .collect();

    Ok(Self {
      day_name: optional_string(obj, "day_name", "plan")?,
      location: optional_string(obj, "location", "plan")?,
      phase: optional_string(obj, "phase", "plan")?,
      exercises,
      extra,
    })
  }

  pub fn to_json(&self) -> Value {
    let mut obj = Map::new();
    for (key, value) in [
      ("day_name", &self.day_name),
      ("location", &self.location),
      ("phase", &self.phase),
    ] {
      if let Some(text) = value {
        obj.insert(key.into(), Value::String(text.clone()));
      }
    }
    obj.insert(
      "exercises".into(),
      Value::Array(self.exercises.iter().map(Exercise::to_json).collect()),
    );
    for (key, value) in &self.extra {
      obj.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(obj)
  }

  pub fn exercise(&self, id: &str) -> Option<&Exercise> {
    self.exercises.iter().find(|e| e.id == id)
  }

  /// Insert at `position` (clamped to the end); returns the index used
  pub fn insert_exercise(
    &mut self,
    exercise: Exercise,
    position: Option<usize>,
  ) -> Result<usize, ValidationError> {
    if self.exercise(&exercise.id).is_some() {
      return Err(ValidationError::new(
        "exercise.id",
        exercise.id.as_str(),
        "duplicate exercise id within plan",
      ));
    }
    let index = position
      .unwrap_or(self.exercises.len())
      .min(self.exercises.len());
    self.exercises.insert(index, exercise);
    Ok(index)
  }

  /// Merge `fields` into the exercise with `id`. Returns false if there is none.
  pub fn update_exercise(
    &mut self,
    id: &str,
    fields: &Map<String, Value>,
  ) -> Result<bool, ValidationError> {
    let Some(index) = self.exercises.iter().position(|e| e.id == id) else {
      return Ok(false);
    };
    let updated = self.exercises[index].merged_with(fields, "exercise")?;
    if updated.id != id && self.exercise(&updated.id).is_some() {
      return Err(ValidationError::new(
        "exercise.id",
        updated.id.as_str(),
        "duplicate exercise id within plan",
      ));
    }
    self.exercises[index] = updated;
    Ok(true)
  }

  pub fn remove_exercise(&mut self, id: &str) -> Option<Exercise> {
    let index = self.exercises.iter().position(|e| e.id == id)?;
    Some(self.exercises.remove(index))
  }

  /// Patch plan-level fields. Unknown keys are kept; `null` clears a field.
  pub fn apply_metadata(&mut self, fields: &Map<String, Value>) -> Result<(), ValidationError> {
    for (key, value) in fields {
      match key.as_str() {
        "exercises" => {
          return Err(ValidationError::for_value(
            "exercises",
            value,
            "use add_exercise, update_exercise or remove_exercise to change exercises",
          ));
        }
        "day_name" | "location" | "phase" => {
          let parsed = optional_string(fields, key, "plan")?;
          match key.as_str() {
            "day_name" => self.day_name = parsed,
            "location" => self.location = parsed,
            _ => self.phase = parsed,
          }
        }
        other if RECORD_FIELDS.contains(&other) => {
          return Err(ValidationError::for_value(other, value, "managed by storage"));
        }
        other => {
          if value.is_null() {
            self.extra.remove(other);
          } else {
            self.extra.insert(other.to_string(), value.clone());
          }
        }
      }
    }
    Ok(())
  }
}

fn check_unique_ids(exercises: &[Exercise]) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  for (i, exercise) in exercises.iter().enumerate() {
    if !seen.insert(exercise.id.as_str()) {
      return Err(ValidationError::new(
        format!("exercises[{}].id", i),
        exercise.id.as_str(),
        "duplicate exercise id within plan",
      ));
    }
  }
  Ok(())
}

impl TryFrom<Value> for Plan {
  type Error = ValidationError;
  fn try_from(value: Value) -> Result<Self, Self::Error> {
    Self::from_json(&value)
  }
}

impl From<Plan> for Value {
  fn from(plan: Plan) -> Self {
    plan.to_json()
  }
}

/// A stored plan row
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRecord {
  pub date: NaiveDate,
  pub plan: Plan,
  pub last_modified: DateTime<Utc>,
  pub last_modified_by: Option<String>,
}

impl PlanRecord {
  /// Shape returned by the authoring tools
  pub fn to_tool_json(&self) -> Value {
    json!({
      "date": date_key(self.date),
      "last_modified": format_timestamp(self.last_modified),
      "last_modified_by": self.last_modified_by,
      "plan": self.plan.to_json(),
    })
  }

  /// Shape sent to clients: the plan body with the row timestamp inline
  pub fn to_sync_json(&self) -> Value {
    let mut body = self.plan.to_json();
    if let Value::Object(obj) = &mut body {
      obj.insert(
        "_lastModified".into(),
        Value::String(format_timestamp(self.last_modified)),
      );
    }
    body
  }
}
