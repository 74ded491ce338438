//! Bulk plan ingestion.
//!
//! Each date is parsed, optionally flattened from a block-style program, and
//! written on its own. A failure on one date never undoes the dates already
//! written; the report says what happened to each.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{ToolError, TOOL_ACTOR};
use crate::db::WriteHandle;
use crate::models::{date_key, parse_date, Plan};
use crate::transform::transform_program;

#[derive(Debug, Deserialize)]
pub struct IngestArgs {
  pub plans_by_date: Map<String, Value>,
  #[serde(default = "default_transform")]
  pub transform_blocks: bool,
}

fn default_transform() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateOutcome {
  pub date: String,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exercises: Option<usize>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
  /// True only when every date was written
  pub success: bool,
  pub written: usize,
  pub failed: usize,
  pub results: Vec<DateOutcome>,
}

impl IngestReport {
  pub fn to_json(&self) -> Value {
    serde_json::to_value(self).unwrap_or(Value::Null)
  }
}

/// Write every plan in `plans_by_date`, in date-key order
pub async fn ingest_training_program(
  writer: &WriteHandle,
  plans_by_date: &Map<String, Value>,
  transform_blocks: bool,
) -> Value {
  ingest(writer, plans_by_date, transform_blocks).await.to_json()
}

pub async fn ingest(
  writer: &WriteHandle,
  plans_by_date: &Map<String, Value>,
  transform_blocks: bool,
) -> IngestReport {
  let mut keys: Vec<&String> = plans_by_date.keys().collect();
  keys.sort();

  let mut results = Vec::with_capacity(keys.len());
  for raw_date in keys {
    let body = &plans_by_date[raw_date.as_str()];
    let outcome = match ingest_one(writer, raw_date, body, transform_blocks).await {
      Ok((date, exercises, warnings)) => DateOutcome {
        date,
        success: true,
        exercises: Some(exercises),
        warnings,
        error: None,
      },
      Err(e) => {
        warn!(date = %raw_date, "ingest failed: {}", e);
        DateOutcome {
          date: raw_date.clone(),
          success: false,
          exercises: None,
          warnings: Vec::new(),
          error: Some(e.to_payload()["error"].clone()),
        }
      }
    };
    results.push(outcome);
  }

  let written = results.iter().filter(|r| r.success).count();
  let failed = results.len() - written;
  info!(written, failed, transform_blocks, "ingest finished");
  IngestReport {
    success: failed == 0,
    written,
    failed,
    results,
  }
}

async fn ingest_one(
  writer: &WriteHandle,
  raw_date: &str,
  body: &Value,
  transform_blocks: bool,
) -> Result<(String, usize, Vec<String>), ToolError> {
  let date = parse_date("date", raw_date)?;
  let (plan, warnings) = if transform_blocks {
    let output = transform_program(body)?;
    (output.plan, output.warnings)
  } else {
    (Plan::from_json(body)?, Vec::new())
  };
  let record = writer.upsert_plan(date, &plan, TOOL_ACTOR).await?;
  Ok((date_key(date), record.plan.exercises.len(), warnings))
}
