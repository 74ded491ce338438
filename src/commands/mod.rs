//! Authoring tools for plan management.
//!
//! Read tools only ever receive a [`ReadHandle`]; write tools receive a
//! [`WriteHandle`]. [`Tools::call`] dispatches a tool by name with JSON
//! arguments, which is how the MCP loop and the ingest CLI reach them.

pub mod guide;
pub mod ingest;
pub mod read;
pub mod write;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::{ReadHandle, StorageError, WriteHandle};
use crate::models::ValidationError;

/// `last_modified_by` stamped on every tool write
pub const TOOL_ACTOR: &str = "mcp";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Invalid arguments for {tool}: {message}")]
  InvalidArguments { tool: String, message: String },

  #[error("Unknown tool: {0}")]
  UnknownTool(String),

  #[error(transparent)]
  Storage(StorageError),
}

impl From<StorageError> for ToolError {
  fn from(e: StorageError) -> Self {
    match e {
      StorageError::Validation(v) => Self::Validation(v),
      StorageError::NotFound(what) => Self::NotFound(what),
      other => Self::Storage(other),
    }
  }
}

impl ToolError {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Validation(_) => "validation",
      Self::NotFound(_) => "not_found",
      Self::InvalidArguments { .. } => "invalid_arguments",
      Self::UnknownTool(_) => "unknown_tool",
      Self::Storage(StorageError::ReadOnly(_)) => "read_only",
      Self::Storage(_) => "storage",
    }
  }

  /// Structured failure returned to the tool caller
  pub fn to_payload(&self) -> Value {
    let mut error = json!({"kind": self.kind(), "message": self.to_string()});
    if let Self::Validation(v) = self {
      error["field"] = Value::String(v.field.clone());
      error["value"] = Value::String(v.value.clone());
    }
    json!({"success": false, "error": error})
  }
}

impl Serialize for ToolError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.to_payload().serialize(serializer)
  }
}

/// ---------------------------------------------------------------------------
/// Dispatch
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Tools {
  reader: ReadHandle,
  writer: WriteHandle,
}

impl Tools {
  pub fn new(reader: ReadHandle, writer: WriteHandle) -> Self {
    Self { reader, writer }
  }

  pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
    debug!(tool = name, "tool call");
    let args = if args.is_null() { json!({}) } else { args };
    let result = match name {
      "get_workout_plan" => {
        let a: read::DateRangeArgs = parse_args(name, args)?;
        read::get_workout_plan(&self.reader, &a.start_date, &a.end_date).await
      }
      "get_workout_logs" => {
        let a: read::DateRangeArgs = parse_args(name, args)?;
        read::get_workout_logs(&self.reader, &a.start_date, &a.end_date).await
      }
      "list_scheduled_dates" => {
        let a: read::OptionalRangeArgs = parse_args(name, args)?;
        read::list_scheduled_dates(&self.reader, a.start_date.as_deref(), a.end_date.as_deref())
          .await
      }
      "get_workout_summary" => {
        let a: read::SummaryArgs = parse_args(name, args)?;
        read::get_workout_summary(&self.reader, a.days).await
      }
      "query_database" => {
        let a: read::QueryArgs = parse_args(name, args)?;
        read::query_database(&self.reader, &a.sql, &a.params).await
      }
      "set_workout_plan" => {
        let a: write::SetPlanArgs = parse_args(name, args)?;
        write::set_workout_plan(&self.writer, &a.date, &a.plan).await
      }
      "delete_workout_plan" => {
        let a: write::DateArgs = parse_args(name, args)?;
        write::delete_workout_plan(&self.writer, &a.date).await
      }
      "update_plan_metadata" => {
        let a: write::MetadataArgs = parse_args(name, args)?;
        write::update_plan_metadata(&self.writer, &a.date, &a.fields).await
      }
      "add_exercise" => {
        let a: write::AddExerciseArgs = parse_args(name, args)?;
        write::add_exercise(&self.writer, &a.date, &a.exercise, a.position).await
      }
      "update_exercise" => {
        let a: write::UpdateExerciseArgs = parse_args(name, args)?;
        write::update_exercise(&self.writer, &a.date, &a.exercise_id, &a.fields).await
      }
      "remove_exercise" => {
        let a: write::ExerciseRefArgs = parse_args(name, args)?;
        write::remove_exercise(&self.writer, &a.date, &a.exercise_id).await
      }
      "ingest_training_program" => {
        let a: ingest::IngestArgs = parse_args(name, args)?;
        Ok(ingest::ingest_training_program(&self.writer, &a.plans_by_date, a.transform_blocks).await)
      }
      other => Err(ToolError::UnknownTool(other.to_string())),
    };

    if let Err(e) = &result {
      warn!(tool = name, kind = e.kind(), "tool failed: {}", e);
    }
    result
  }
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
  serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
    tool: tool.to_string(),
    message: e.to_string(),
  })
}

/// ---------------------------------------------------------------------------
/// Catalogue
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
  pub name: &'static str,
  pub description: &'static str,
  pub input_schema: Value,
}

fn date_prop(description: &str) -> Value {
  json!({"type": "string", "format": "date", "description": description})
}

/// Every tool [`Tools::call`] accepts
pub fn catalogue() -> Vec<ToolDefinition> {
  let range = json!({
    "type": "object",
    "properties": {
      "start_date": date_prop("First date (YYYY-MM-DD)"),
      "end_date": date_prop("Last date, inclusive (YYYY-MM-DD)")
    },
    "required": ["start_date", "end_date"]
  });

  vec![
    ToolDefinition {
      name: "get_workout_plan",
      description: "Read the workout plans scheduled in a date range, with their full exercise lists.",
      input_schema: range.clone(),
    },
    ToolDefinition {
      name: "get_workout_logs",
      description: "Read completed workout logs in a date range. Logs are written by the tracker app only.",
      input_schema: range,
    },
    ToolDefinition {
      name: "list_scheduled_dates",
      description: "List dates that have a plan. Defaults to today through six weeks out.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "start_date": date_prop("First date, default today"),
          "end_date": date_prop("Last date, default six weeks from today")
        }
      }),
    },
    ToolDefinition {
      name: "get_workout_summary",
      description: "Planned vs completed counts, completion rate and exercise types over recent days.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "days": {"type": "integer", "minimum": 0, "maximum": read::MAX_SUMMARY_DAYS, "default": read::DEFAULT_SUMMARY_DAYS}
        }
      }),
    },
    ToolDefinition {
      name: "query_database",
      description: "Run a read-only SELECT against the workout database. Results are row-capped.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "sql": {"type": "string"},
          "params": {"type": "array", "items": {}}
        },
        "required": ["sql"]
      }),
    },
    ToolDefinition {
      name: "set_workout_plan",
      description: "Create or fully replace the plan for a date. See the plan guide resource for the exercise format. Row bookkeeping keys in the plan body (date, last_modified, last_modified_by, _lastModified) are ignored; storage sets them.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "date": date_prop("Target date"),
          "plan": {"type": "object", "description": "Plan with day_name, location, phase and an exercises array"}
        },
        "required": ["date", "plan"]
      }),
    },
    ToolDefinition {
      name: "delete_workout_plan",
      description: "Delete the plan for a date.",
      input_schema: json!({
        "type": "object",
        "properties": {"date": date_prop("Target date")},
        "required": ["date"]
      }),
    },
    ToolDefinition {
      name: "update_plan_metadata",
      description: "Patch plan-level fields (day_name, location, phase, extras). null clears a field.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "date": date_prop("Target date"),
          "fields": {"type": "object"}
        },
        "required": ["date", "fields"]
      }),
    },
    ToolDefinition {
      name: "add_exercise",
      description: "Insert one exercise into a plan, at the end or at a zero-based position.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "date": date_prop("Target date"),
          "exercise": {"type": "object"},
          "position": {"type": "integer", "minimum": 0}
        },
        "required": ["date", "exercise"]
      }),
    },
    ToolDefinition {
      name: "update_exercise",
      description: "Merge fields into one exercise of a plan, found by id.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "date": date_prop("Target date"),
          "exercise_id": {"type": "string"},
          "fields": {"type": "object"}
        },
        "required": ["date", "exercise_id", "fields"]
      }),
    },
    ToolDefinition {
      name: "remove_exercise",
      description: "Remove one exercise from a plan, found by id.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "date": date_prop("Target date"),
          "exercise_id": {"type": "string"}
        },
        "required": ["date", "exercise_id"]
      }),
    },
    ToolDefinition {
      name: "ingest_training_program",
      description: "Write many plans at once, keyed by date. With transform_blocks, each value is a block-style program that is flattened first. Dates are written independently; the result reports each one.",
      input_schema: json!({
        "type": "object",
        "properties": {
          "plans_by_date": {"type": "object", "additionalProperties": {"type": "object"}},
          "transform_blocks": {"type": "boolean", "default": true}
        },
        "required": ["plans_by_date"]
      }),
    },
  ]
}
