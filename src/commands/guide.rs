//! Plan-authoring guide served as an MCP resource.

pub const PLAN_GUIDE_URI: &str = "file://coach_plan_guide";
pub const PLAN_GUIDE_NAME: &str = "Coach plan guide";

pub fn plan_guide() -> &'static str {
  PLAN_GUIDE
}

const PLAN_GUIDE: &str = r#"# Coach Workout Plan Guide

## Workflow
1. `list_scheduled_dates` shows which dates already have a plan.
2. `get_workout_plan` returns existing plans for a date range.
3. `set_workout_plan` creates or replaces one day; `add_exercise`,
   `update_exercise`, `remove_exercise` and `update_plan_metadata` edit a
   plan in place.
4. `get_workout_logs` and `get_workout_summary` show what was actually done.
5. `ingest_training_program` writes many days at once, optionally from the
   block format below.

## Plan
- `day_name`: focus of the day, e.g. "Lower Body + Bike"
- `location`: "Home" or "Gym"
- `phase`: "Foundation", "Building" or "Intensity"
- `exercises`: ordered list; every `id` must be unique within the plan

## Exercise types
Every exercise has `id`, `name`, `type` and an optional `guidance_note`.

- `strength`: `target_sets` (integer), `target_reps` (integer or text such as "8-10")
- `circuit`: same fields as strength, done as rounds
- `duration`: `target_duration_min`
- `checklist`: `items`, a list of strings
- `weighted_time`: `target_duration_sec` (default 60)
- `interval`: `rounds`, `work_duration_sec`, `rest_duration_sec`

Optional on any type: `equipment`, one of bodyweight, band, kettlebell,
dumbbell, barbell, machine, cable. Bodyweight and band exercises hide the
weight input in the tracker. Without `equipment` the tracker guesses from
the name (push-ups, planks, band work and so on).

```json
{
  "day_name": "Lower Body + Conditioning",
  "location": "Home",
  "phase": "Foundation",
  "exercises": [
    {"id": "warmup_1", "name": "Stability Start", "type": "checklist",
     "items": ["Cat-Cow x10", "Bird-Dog x5/side", "Dead Bug x10"]},
    {"id": "ex_1", "name": "KB Goblet Squat", "type": "strength",
     "target_sets": 3, "target_reps": "10", "equipment": "kettlebell",
     "guidance_note": "Tempo 3-1-1. Rest until HR <= 130."},
    {"id": "cardio_1", "name": "Zone 2 Bike", "type": "duration",
     "target_duration_min": 15, "guidance_note": "HR 135-148. Log Avg/Max HR."}
  ]
}
```

## Block format (ingest with transform_blocks = true)
A program has `theme`, `location`, `phase`, `total_duration_min` and a list
of `blocks`. Each block has a `block_type`, an optional `title`,
`rest_guidance` and `rounds`, and either `exercises` or cardio
`instructions`.

- `warmup` blocks become one checklist; each entry becomes "Name xReps".
- `strength` and `accessory` entries become strength exercises. Tempo,
  load guide, notes and the block's rest guidance form the guidance note.
- `circuit` and `power` entries become circuit exercises. An entry's own
  `sets` wins over the block's `rounds`.
- `cardio` blocks with `instructions` become one duration exercise; the
  instruction lines are joined into the guidance note.
- Unknown block types are kept and treated as strength, with a warning.

Ids are generated as `warmup_{block}` and `{block_type}_{block}_{n}`.
"#;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Plan;
  use serde_json::Value;

  #[test]
  fn test_guide_example_is_a_valid_plan() {
    let guide = plan_guide();
    let start = guide.find("```json").unwrap() + "```json".len();
    let end = start + guide[start..].find("```").unwrap();
    let example: Value = serde_json::from_str(&guide[start..end]).unwrap();
    let plan = Plan::from_json(&example).unwrap();
    assert_eq!(plan.exercises.len(), 3);
  }
}
