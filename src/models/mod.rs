pub mod dates;
pub mod exercise;
pub mod log;
pub mod plan;
pub mod sync;
pub mod validation;

pub use dates::{date_key, format_timestamp, parse_date, parse_timestamp, utc_now};
pub use exercise::{Equipment, Exercise, ExerciseKind, RepTarget};
pub use log::{
  ChecklistResult, DurationResult, ExerciseResult, SessionFeedback, SetResult, SetsResult, WorkoutLog,
};
pub use plan::{Plan, PlanRecord};
pub use sync::{Client, LogRecord, SyncMetadata};
pub use validation::ValidationError;
