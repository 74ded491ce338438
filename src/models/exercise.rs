//! Exercise definitions inside a plan.
//!
//! The JSON form is a flat object with a `type` discriminator. In Rust the
//! kind-specific fields live in [`ExerciseKind`] so every consumer has to
//! handle each kind explicitly. Fields we don't model are kept in `extra`
//! and written back untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;

use super::validation::{optional_bool, optional_string, ValidationError};

/// Every accepted value of an exercise's `type`
pub const EXERCISE_TYPES: [&str; 6] = [
  "strength",
  "duration",
  "checklist",
  "weighted_time",
  "interval",
  "circuit",
];

/// Keys shared by all exercise kinds
const COMMON_FIELDS: [&str; 7] = [
  "id",
  "name",
  "type",
  "guidance_note",
  "equipment",
  "hide_weight",
  "show_time",
];

const DEFAULT_WEIGHTED_TIME_SEC: u32 = 60;

/// Name fragments marking bodyweight or band work (matched lowercase)
const BODYWEIGHT_OR_BAND_TERMS: [&str; 22] = [
  "push-up",
  "pushup",
  "push up",
  "pull-up",
  "pullup",
  "pull up",
  "chin-up",
  "chinup",
  "band",
  "bodyweight",
  "body weight",
  "jump",
  "plank",
  "dead hang",
  "wall sit",
  "glute bridge",
  "burpee",
  "mountain climber",
  "bird-dog",
  "bird dog",
  "dead bug",
  "cat-cow",
];

/// True when the exercise name reads like bodyweight or band work
pub fn is_bodyweight_or_band(name: &str) -> bool {
  let lower = name.to_lowercase();
  BODYWEIGHT_OR_BAND_TERMS
    .iter()
    .any(|term| lower.contains(term))
}

/// ---------------------------------------------------------------------------
/// Equipment
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
  Bodyweight,
  Band,
  Kettlebell,
  Dumbbell,
  Barbell,
  Machine,
  Cable,
}

impl Equipment {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Bodyweight => "bodyweight",
      Self::Band => "band",
      Self::Kettlebell => "kettlebell",
      Self::Dumbbell => "dumbbell",
      Self::Barbell => "barbell",
      Self::Machine => "machine",
      Self::Cable => "cable",
    }
  }

  /// Loads for these can't be logged as a weight
  pub fn hides_weight(self) -> bool {
    matches!(self, Self::Bodyweight | Self::Band)
  }
}

impl fmt::Display for Equipment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Equipment {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "bodyweight" => Ok(Self::Bodyweight),
      "band" => Ok(Self::Band),
      "kettlebell" => Ok(Self::Kettlebell),
      "dumbbell" => Ok(Self::Dumbbell),
      "barbell" => Ok(Self::Barbell),
      "machine" => Ok(Self::Machine),
      "cable" => Ok(Self::Cable),
      _ => Err(format!("Unknown equipment: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Rep Targets
/// ---------------------------------------------------------------------------

/// Either a plain rep count or a free-text scheme ("8-10", "30 sec/side")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepTarget {
  Count(u32),
  Scheme(String),
}

impl RepTarget {
  pub fn to_json(&self) -> Value {
    match self {
      Self::Count(n) => Value::from(*n),
      Self::Scheme(text) => Value::String(text.clone()),
    }
  }

  /// Rep schemes expressed in seconds are timed holds, not counted reps
  pub fn is_timed(&self) -> bool {
    match self {
      Self::Count(_) => false,
      Self::Scheme(text) => text.to_lowercase().contains("sec"),
    }
  }
}

impl fmt::Display for RepTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Count(n) => write!(f, "{}", n),
      Self::Scheme(text) => f.write_str(text),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Exercise Kinds
/// ---------------------------------------------------------------------------

fn default_weighted_time_sec() -> u32 {
  DEFAULT_WEIGHTED_TIME_SEC
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExerciseKind {
  Strength {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_reps: Option<RepTarget>,
  },
  Duration {
    /// Kept as authored: `15` and `15.0` stay distinct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_duration_min: Option<Number>,
  },
  Checklist {
    #[serde(default)]
    items: Vec<String>,
  },
  WeightedTime {
    #[serde(default = "default_weighted_time_sec")]
    target_duration_sec: u32,
  },
  Interval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    work_duration_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rest_duration_sec: Option<u32>,
  },
  Circuit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_reps: Option<RepTarget>,
  },
}

impl ExerciseKind {
  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Strength { .. } => "strength",
      Self::Duration { .. } => "duration",
      Self::Checklist { .. } => "checklist",
      Self::WeightedTime { .. } => "weighted_time",
      Self::Interval { .. } => "interval",
      Self::Circuit { .. } => "circuit",
    }
  }

  /// JSON keys owned by this kind
  fn field_names(&self) -> &'static [&'static str] {
    match self {
      Self::Strength { .. } | Self::Circuit { .. } => &["target_sets", "target_reps"],
      Self::Duration { .. } => &["target_duration_min"],
      Self::Checklist { .. } => &["items"],
      Self::WeightedTime { .. } => &["target_duration_sec"],
      Self::Interval { .. } => &["rounds", "work_duration_sec", "rest_duration_sec"],
    }
  }

  /// Write `type` and the kind's own fields into `obj`
  fn write_fields(&self, obj: &mut Map<String, Value>) {
    obj.insert("type".into(), Value::String(self.type_name().into()));
    let mut put = |key: &str, value: Option<Value>| {
      if let Some(value) = value {
        obj.insert(key.into(), value);
      }
    };
    match self {
      Self::Strength { target_sets, target_reps } | Self::Circuit { target_sets, target_reps } => {
        put("target_sets", target_sets.map(Value::from));
        put("target_reps", target_reps.as_ref().map(RepTarget::to_json));
      }
      Self::Duration { target_duration_min } => {
        put("target_duration_min", target_duration_min.clone().map(Value::Number));
      }
      Self::Checklist { items } => {
        put("items", Some(Value::from(items.clone())));
      }
      Self::WeightedTime { target_duration_sec } => {
        put("target_duration_sec", Some(Value::from(*target_duration_sec)));
      }
      Self::Interval {
        rounds,
        work_duration_sec,
        rest_duration_sec,
      } => {
        put("rounds", rounds.map(Value::from));
        put("work_duration_sec", work_duration_sec.map(Value::from));
        put("rest_duration_sec", rest_duration_sec.map(Value::from));
      }
    }
  }

  pub fn target_sets(&self) -> Option<u32> {
    match self {
      Self::Strength { target_sets, .. } | Self::Circuit { target_sets, .. } => *target_sets,
      _ => None,
    }
  }

  pub fn target_reps(&self) -> Option<&RepTarget> {
    match self {
      Self::Strength { target_reps, .. } | Self::Circuit { target_reps, .. } => {
        target_reps.as_ref()
      }
      _ => None,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Exercise
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Exercise {
  pub id: String,
  pub name: String,
  pub kind: ExerciseKind,
  pub guidance_note: Option<String>,
  pub equipment: Option<Equipment>,
  /// Flag as authored (or set by the block transform). Stored and
  /// serialized verbatim; [`Exercise::hide_weight`] derives the effective value.
  pub hide_weight: Option<bool>,
  pub show_time: Option<bool>,
  pub extra: Map<String, Value>,
}

impl Exercise {
  pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ExerciseKind) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      kind,
      guidance_note: None,
      equipment: None,
      hide_weight: None,
      show_time: None,
      extra: Map::new(),
    }
  }

  pub fn type_name(&self) -> &'static str {
    self.kind.type_name()
  }

  /// Whether consumers should hide the weight input.
  ///
  /// An explicit flag wins, then equipment, then the name heuristic.
  pub fn hide_weight(&self) -> bool {
    self
      .hide_weight
      .or_else(|| self.equipment.map(Equipment::hides_weight))
      .unwrap_or_else(|| is_bodyweight_or_band(&self.name))
  }

  /// Parse an exercise object; `path` prefixes field names in errors
  pub fn from_json(value: &Value, path: &str) -> Result<Self, ValidationError> {
    let obj = value
      .as_object()
      .ok_or_else(|| ValidationError::for_value(path, value, "expected an exercise object"))?;

    let id = required_string(obj, "id", path)?;
    let name = required_string(obj, "name", path)?;

    let type_field = format!("{}.type", path);
    let type_name = match obj.get("type") {
      Some(Value::String(t)) => t.as_str(),
      Some(other) => {
        return Err(ValidationError::for_value(type_field, other, "expected a string"));
      }
      None => return Err(ValidationError::missing(type_field)),
    };
    if !EXERCISE_TYPES.contains(&type_name) {
      return Err(ValidationError::new(
        type_field,
        type_name,
        format!("invalid type, must be one of: {}", EXERCISE_TYPES.join(", ")),
      ));
    }

    let kind: ExerciseKind = serde_json::from_value(value.clone())
      .map_err(|e| ValidationError::for_value(path, value, e.to_string()))?;

    let equipment = match optional_string(obj, "equipment", path)? {
      Some(raw) => Some(raw.parse::<Equipment>().map_err(|reason| {
        ValidationError::new(format!("{}.equipment", path), raw.as_str(), reason)
      })?),
      None => None,
    };

    let owned = kind.field_names();
    let extra = obj
      .iter()
      .filter(|(key, _)| !COMMON_FIELDS.contains(&key.as_str()) && !owned.contains(&key.as_str()))
      .map(|(key, v)| (key.clone(), v.clone()))
      .collect();

    Ok(Self {
      id,
      name,
      guidance_note: optional_string(obj, "guidance_note", path)?,
      equipment,
      hide_weight: optional_bool(obj, "hide_weight", path)?,
      show_time: optional_bool(obj, "show_time", path)?,
      kind,
      extra,
    })
  }

  pub fn to_json(&self) -> Value {
    let mut obj = Map::new();
    obj.insert("id".into(), Value::String(self.id.clone()));
    obj.insert("name".into(), Value::String(self.name.clone()));
    self.kind.write_fields(&mut obj);
    if let Some(note) = &self.guidance_note {
      obj.insert("guidance_note".into(), Value::String(note.clone()));
    }
    if let Some(equipment) = self.equipment {
      obj.insert("equipment".into(), Value::String(equipment.as_str().into()));
    }
    if let Some(hide) = self.hide_weight {
      obj.insert("hide_weight".into(), Value::Bool(hide));
    }
    if let Some(show) = self.show_time {
      obj.insert("show_time".into(), Value::Bool(show));
    }
    for (key, value) in &self.extra {
      obj.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(obj)
  }

  /// Apply a partial update and re-validate the result
  pub fn merged_with(&self, fields: &Map<String, Value>, path: &str) -> Result<Self, ValidationError> {
    let mut merged = match self.to_json() {
      Value::Object(obj) => obj,
      _ => Map::new(),
    };
    // A changed kind must not inherit the old kind's fields
    if fields.get("type").and_then(Value::as_str).is_some_and(|t| t != self.type_name()) {
      for key in self.kind.field_names() {
        merged.remove(*key);
      }
    }
    for (key, value) in fields {
      merged.insert(key.clone(), value.clone());
    }
    Self::from_json(&Value::Object(merged), path)
  }
}

fn required_string(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, ValidationError> {
  let field = format!("{}.{}", path, key);
  match obj.get(key) {
    Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
    Some(Value::String(s)) => Err(ValidationError::new(field, s.as_str(), "must not be empty")),
    Some(Value::Null) | None => Err(ValidationError::missing(field)),
    Some(other) => Err(ValidationError::for_value(field, other, "expected a string")),
  }
}

impl TryFrom<Value> for Exercise {
  type Error = ValidationError;
  fn try_from(value: Value) -> Result<Self, Self::Error> {
    Self::from_json(&value, "exercise")
  }
}

impl From<Exercise> for Value {
  fn from(exercise: Exercise) -> Self {
    exercise.to_json()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_strength_with_rep_scheme() {
    let ex = Exercise::from_json(
      &json!({"id": "ex_1", "name": "KB Goblet Squat", "type": "strength",
              "target_sets": 3, "target_reps": "8-10", "guidance_note": "Tempo 3-1-1"}),
      "exercises[0]",
    )
    .unwrap();
    assert_eq!(ex.kind.target_sets(), Some(3));
    assert_eq!(ex.kind.target_reps(), Some(&RepTarget::Scheme("8-10".into())));
    assert_eq!(ex.guidance_note.as_deref(), Some("Tempo 3-1-1"));
  }

  #[test]
  fn test_unknown_kind_rejected_with_field() {
    let err = Exercise::from_json(
      &json!({"id": "ex_1", "name": "Squat", "type": "invalid_type"}),
      "exercises[0]",
    )
    .unwrap_err();
    assert_eq!(err.field, "exercises[0].type");
    assert_eq!(err.value, "invalid_type");
    assert!(err.reason.contains("invalid type"));
  }

  #[test]
  fn test_missing_id_rejected() {
    let err = Exercise::from_json(&json!({"name": "Squat", "type": "strength"}), "exercises[0]")
      .unwrap_err();
    assert_eq!(err.field, "exercises[0].id");
    assert!(err.reason.contains("missing"));
  }

  #[test]
  fn test_weighted_time_defaults_to_sixty_seconds() {
    let ex = Exercise::from_json(
      &json!({"id": "ex_5", "name": "Farmer's Carry", "type": "weighted_time"}),
      "exercise",
    )
    .unwrap();
    assert_eq!(ex.kind, ExerciseKind::WeightedTime { target_duration_sec: 60 });
  }

  #[test]
  fn test_round_trip_preserves_unknown_fields_and_integers() {
    let raw = json!({"id": "cardio_1", "name": "Zone 2 Bike", "type": "duration",
                     "target_duration_min": 15, "guidance_note": "HR 135-148",
                     "coach_tag": {"zone": 2}});
    let ex = Exercise::from_json(&raw, "exercise").unwrap();
    assert_eq!(ex.extra.get("coach_tag"), Some(&json!({"zone": 2})));
    assert_eq!(ex.to_json(), raw);
  }

  #[test]
  fn test_band_equipment_hides_weight() {
    let mut ex = Exercise::new("a", "Face Pull", ExerciseKind::Strength { target_sets: None, target_reps: None });
    ex.equipment = Some(Equipment::Band);
    assert!(ex.hide_weight());
    // Derived, not written back
    assert!(ex.to_json().get("hide_weight").is_none());
  }

  #[test]
  fn test_kettlebell_equipment_shows_weight() {
    let mut ex = Exercise::new("a", "Push-up Row", ExerciseKind::Strength { target_sets: None, target_reps: None });
    ex.equipment = Some(Equipment::Kettlebell);
    assert!(!ex.hide_weight());
    assert!(ex.to_json().get("hide_weight").is_none());
  }

  #[test]
  fn test_name_heuristic_without_equipment() {
    let pushups = Exercise::new("a", "Push-ups", ExerciseKind::Strength { target_sets: None, target_reps: None });
    assert!(pushups.hide_weight());
    let swings = Exercise::new("b", "KB Swings", ExerciseKind::Strength { target_sets: None, target_reps: None });
    assert!(!swings.hide_weight());
  }

  #[test]
  fn test_bodyweight_lexicon() {
    for name in ["Push-ups", "Pushup", "Wide Push Up", "Band Pull-Aparts", "Banded Face Pulls",
                 "Bodyweight Squat Hold", "Jump Squat", "Plank Hold", "Dead Hang", "Wall Sit", "Glute Bridge"] {
      assert!(is_bodyweight_or_band(name), "{} should be bodyweight/band", name);
    }
    for name in ["KB Swings", "Farmer's Carry", "Dumbbell Row", "Barbell Squat"] {
      assert!(!is_bodyweight_or_band(name), "{} should be loaded", name);
    }
  }

  #[test]
  fn test_unknown_equipment_rejected() {
    let err = Exercise::from_json(
      &json!({"id": "a", "name": "Row", "type": "strength", "equipment": "sled"}),
      "exercise",
    )
    .unwrap_err();
    assert_eq!(err.field, "exercise.equipment");
  }

  #[test]
  fn test_merge_changes_kind_and_drops_old_fields() {
    let ex = Exercise::from_json(
      &json!({"id": "a", "name": "Bike", "type": "strength", "target_sets": 3}),
      "exercise",
    )
    .unwrap();
    let fields = json!({"type": "duration", "target_duration_min": 20});
    let merged = ex.merged_with(fields.as_object().unwrap(), "exercise").unwrap();
    assert_eq!(merged.kind, ExerciseKind::Duration { target_duration_min: Some(Number::from(20)) });
    assert!(merged.to_json().get("target_sets").is_none());
  }

  #[test]
  fn test_explicit_flag_beats_equipment_and_survives_round_trip() {
    let raw = json!({"id": "b", "name": "KB Swing", "type": "strength",
                     "equipment": "kettlebell", "hide_weight": true});
    let ex = Exercise::from_json(&raw, "exercise").unwrap();
    assert!(ex.hide_weight());
    assert_eq!(ex.to_json(), raw);

    let raw = json!({"id": "c", "name": "Push-ups", "type": "strength", "hide_weight": false});
    let ex = Exercise::from_json(&raw, "exercise").unwrap();
    assert!(!ex.hide_weight());
    assert_eq!(ex.to_json(), raw);
  }

  #[test]
  fn test_heuristic_name_is_not_written_back() {
    let raw = json!({"id": "a", "name": "Push-ups", "type": "strength", "target_sets": 3, "target_reps": 12});
    let ex = Exercise::from_json(&raw, "exercise").unwrap();
    assert!(ex.hide_weight());
    assert_eq!(ex.to_json(), raw);
  }

  #[test]
  fn test_duration_number_kept_as_authored() {
    for raw in [
      json!({"id": "a", "name": "Bike", "type": "duration", "target_duration_min": 15.0}),
      json!({"id": "a", "name": "Bike", "type": "duration", "target_duration_min": 12.5}),
      json!({"id": "a", "name": "Bike", "type": "duration", "target_duration_min": 15}),
    ] {
      let ex = Exercise::from_json(&raw, "exercise").unwrap();
      assert_eq!(ex.to_json(), raw);
    }
  }

  #[test]
  fn test_every_kind_writes_its_fields() {
    for raw in [
      json!({"id": "a", "name": "Squat", "type": "strength", "target_sets": 3, "target_reps": "8-10"}),
      json!({"id": "a", "name": "Swing", "type": "circuit", "target_sets": 4, "target_reps": 15}),
      json!({"id": "a", "name": "Warmup", "type": "checklist", "items": ["Cat-Cow x10", "Dead Bug x10"]}),
      json!({"id": "a", "name": "Carry", "type": "weighted_time", "target_duration_sec": 45}),
      json!({"id": "a", "name": "Sprints", "type": "interval", "rounds": 6,
             "work_duration_sec": 20, "rest_duration_sec": 40}),
    ] {
      let ex = Exercise::from_json(&raw, "exercise").unwrap();
      assert_eq!(ex.to_json(), raw);
    }
  }

  #[test]
  fn test_timed_rep_schemes() {
    assert!(RepTarget::Scheme("30 sec/side".into()).is_timed());
    assert!(RepTarget::Scheme("20 SEC".into()).is_timed());
    assert!(!RepTarget::Scheme("8/leg".into()).is_timed());
    assert!(!RepTarget::Count(10).is_timed());
  }
}
