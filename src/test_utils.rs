//! Test utilities and helpers for unit and integration testing
//!
//! This module provides common test infrastructure including:
//! - Temp-file database setup
//! - Sample plan, log and program fixtures
//! - Helper assertions

use serde_json::{json, Value};
use tempfile::TempDir;

use crate::db::Storage;
use crate::models::{Plan, WorkoutLog};

/// Row cap used by test storage unless a test asks for another
pub const TEST_MAX_ROWS: usize = 100;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create a migrated database in a fresh temp directory.
///
/// The read handle is a separate read-only connection, which an in-memory
/// database can't provide, so tests use a real file. Keep the returned
/// `TempDir` alive for the duration of the test.
pub async fn setup_test_storage() -> (Storage, TempDir) {
  setup_test_storage_with_max_rows(TEST_MAX_ROWS).await
}

pub async fn setup_test_storage_with_max_rows(max_rows: usize) -> (Storage, TempDir) {
  let dir = tempfile::tempdir().expect("Failed to create temp dir");
  let storage = Storage::open(&dir.path().join("coach.db"), max_rows)
    .await
    .expect("Failed to open test database");
  (storage, dir)
}

/// ---------------------------------------------------------------------------
/// Fixtures
/// ---------------------------------------------------------------------------

pub fn sample_plan_json() -> Value {
  json!({
    "day_name": "Test Workout",
    "location": "Home",
    "phase": "Foundation",
    "exercises": [
      {
        "id": "warmup_1",
        "name": "Stability Start",
        "type": "checklist",
        "items": ["Cat-Cow x10", "Bird-Dog x5/side"]
      },
      {
        "id": "ex_1",
        "name": "KB Goblet Squat",
        "type": "strength",
        "target_sets": 3,
        "target_reps": "10",
        "guidance_note": "Tempo 3-1-1"
      },
      {
        "id": "cardio_1",
        "name": "Zone 2 Bike",
        "type": "duration",
        "target_duration_min": 15,
        "guidance_note": "HR 135-148"
      }
    ]
  })
}

pub fn sample_plan() -> Plan {
  Plan::from_json(&sample_plan_json()).expect("sample plan is valid")
}

pub fn sample_log_json() -> Value {
  json!({
    "session_feedback": {
      "pain_discomfort": "None",
      "general_notes": "Good session"
    },
    "warmup_1": {
      "completed_items": ["Cat-Cow x10", "Bird-Dog x5/side"]
    },
    "ex_1": {
      "completed": true,
      "user_note": "Felt strong",
      "sets": [
        {"set_num": 1, "weight": 24, "reps": 10, "rpe": 7},
        {"set_num": 2, "weight": 24, "reps": 10, "rpe": 7.5},
        {"set_num": 3, "weight": 24, "reps": 10, "rpe": 8}
      ]
    },
    "cardio_1": {
      "completed": true,
      "duration_min": 16,
      "avg_hr": 142,
      "max_hr": 149
    }
  })
}

pub fn sample_log() -> WorkoutLog {
  WorkoutLog::from_json(&sample_log_json(), "log").expect("sample log is valid")
}

/// A block-style program: warmup, strength, circuit and a cardio block
pub fn sample_program_json() -> Value {
  json!({
    "theme": "Lower Body Strength",
    "location": "Home",
    "phase": "Foundation",
    "total_duration_min": 60,
    "blocks": [
      {
        "block_type": "warmup",
        "title": "Stability Start",
        "exercises": [
          {"name": "Cat-Cow", "reps": 10},
          {"name": "Bird-Dog", "reps": "5/side"}
        ]
      },
      {
        "block_type": "strength",
        "title": "Main Lifts",
        "rest_guidance": "Rest 2 min",
        "exercises": [
          {"name": "KB Goblet Squat", "sets": 3, "reps": "8-10", "tempo": "3-1-1"},
          {"name": "Single-Leg RDL", "sets": 3, "reps": "8/leg", "equipment": "kettlebell"}
        ]
      },
      {
        "block_type": "circuit",
        "title": "Finisher",
        "rounds": 3,
        "rest_guidance": "60 sec between rounds",
        "exercises": [
          {"name": "KB Swings", "reps": 15, "load_guide": "Heavy"},
          {"name": "Plank Hold", "reps": "30 sec"}
        ]
      },
      {
        "block_type": "cardio",
        "title": "Zone 2 Bike",
        "duration_min": 20,
        "instructions": ["Easy spin", "HR 135-148"]
      }
    ]
  })
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_storage_is_isolated() {
    let (first, _a) = setup_test_storage().await;
    let (second, _b) = setup_test_storage().await;
    first
      .writer()
      .upsert_plan(chrono::NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(), &sample_plan(), "mcp")
      .await
      .unwrap();
    let count = second
      .reader()
      .query("SELECT COUNT(*) AS n FROM workout_plans", &[])
      .await
      .unwrap();
    assert_eq!(count.rows[0]["n"], json!(0));
    first.close().await;
    second.close().await;
  }

  #[test]
  fn test_fixtures_are_valid() {
    assert_eq!(sample_plan().exercises.len(), 3);
    assert_eq!(sample_log().entries.len(), 3);
    assert!(sample_program_json()["blocks"].is_array());
  }
}
