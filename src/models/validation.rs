use serde::Serialize;
use serde_json::Value;

/// Longest rendering of an offending value kept in an error message
const MAX_VALUE_CHARS: usize = 80;

/// A malformed plan, exercise or log, identified by field path and value.
///
/// Raised before anything is written; callers never see partial persistence
/// for a payload that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("invalid {field}: {reason} (got {value})")]
pub struct ValidationError {
  pub field: String,
  pub value: String,
  pub reason: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      value: value.into(),
      reason: reason.into(),
    }
  }

  /// Build an error whose value is a JSON fragment
  pub fn for_value(field: impl Into<String>, value: &Value, reason: impl Into<String>) -> Self {
    Self::new(field, render_value(value), reason)
  }

  /// Error for a field that must be present
  pub fn missing(field: impl Into<String>) -> Self {
    Self::new(field, "nothing", "missing required field")
  }
}

/// Render a JSON value for an error message, shortened if large
pub fn render_value(value: &Value) -> String {
  let rendered = value.to_string();
  if rendered.chars().count() <= MAX_VALUE_CHARS {
    return rendered;
  }
  let mut short: String = rendered.chars().take(MAX_VALUE_CHARS).collect();
  short.push_str("...");
  short
}

/// Read an optional string field; `null` counts as absent
pub(crate) fn optional_string(
  obj: &serde_json::Map<String, Value>,
  key: &str,
  path: &str,
) -> Result<Option<String>, ValidationError> {
  match obj.get(key) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.clone())),
    Some(other) => Err(ValidationError::for_value(
      format!("{}.{}", path, key),
      other,
      "expected a string",
    )),
  }
}

/// Read an optional boolean field; `null` counts as absent
pub(crate) fn optional_bool(
  obj: &serde_json::Map<String, Value>,
  key: &str,
  path: &str,
) -> Result<Option<bool>, ValidationError> {
  match obj.get(key) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Bool(b)) => Ok(Some(*b)),
    Some(other) => Err(ValidationError::for_value(
      format!("{}.{}", path, key),
      other,
      "expected true or false",
    )),
  }
}
