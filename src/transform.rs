//! Block Transformer
//!
//! Turns a free-form training program description (a theme plus an ordered
//! list of blocks) into the flat exercise list a [`Plan`] stores.
//!
//! Rules by block type:
//! - warmup: the whole block becomes one checklist
//! - strength / accessory: one strength exercise per entry, rest guidance included
//! - circuit / power: one circuit exercise per entry; entry `sets` beat block `rounds`
//! - cardio: `instructions` collapse into one duration exercise
//!
//! Unknown block types are carried through as strength and reported, never dropped.

use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::models::exercise::is_bodyweight_or_band;
use crate::models::{Equipment, Exercise, ExerciseKind, Plan, RepTarget, ValidationError};

const DEFAULT_DAY_NAME: &str = "Workout";
const DEFAULT_WARMUP_NAME: &str = "Warm-up";
const DEFAULT_CARDIO_NAME: &str = "Zone 2 Cardio";
const UNNAMED_EXERCISE: &str = "Unknown";
/// Set count used when an entry gives `sets` as something other than a number
const FALLBACK_SETS: u32 = 3;

// ---------------------------------------------------------------------------
/// Block Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    Warmup,
    Strength,
    Accessory,
    Circuit,
    Power,
    Cardio,
    /// Anything else; treated as strength
    Other(String),
}

impl BlockType {
    /// Prefix used in synthesized exercise ids
    pub fn id_prefix(&self) -> &str {
        match self {
            Self::Warmup => "warmup",
            Self::Strength => "strength",
            Self::Accessory => "accessory",
            Self::Circuit => "circuit",
            Self::Power => "power",
            Self::Cardio => "cardio",
            Self::Other(raw) if raw.is_empty() => "block",
            Self::Other(raw) => raw.as_str(),
        }
    }

    fn includes_rest_guidance(&self) -> bool {
        matches!(self, Self::Strength | Self::Accessory | Self::Other(_))
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_prefix())
    }
}

impl FromStr for BlockType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "warmup" | "warm-up" | "warm_up" => Ok(Self::Warmup),
            "strength" => Ok(Self::Strength),
            "accessory" => Ok(Self::Accessory),
            "circuit" => Ok(Self::Circuit),
            "power" => Ok(Self::Power),
            "cardio" => Ok(Self::Cardio),
            _ => Err(format!("Unknown block type: {}", s)),
        }
    }
}

// ---------------------------------------------------------------------------
/// Program Description (input)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgramDescription {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub total_duration_min: Option<Value>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub block_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub rest_guidance: Option<String>,
    #[serde(default)]
    pub rounds: Option<Value>,
    #[serde(default)]
    pub duration_min: Option<Number>,
    #[serde(default)]
    pub exercises: Option<Vec<BlockExercise>>,
    #[serde(default)]
    pub instructions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockExercise {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sets: Option<Value>,
    #[serde(default)]
    pub reps: Option<Value>,
    #[serde(default)]
    pub tempo: Option<Value>,
    #[serde(default)]
    pub load_guide: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub equipment: Option<String>,
    #[serde(default)]
    pub duration_min: Option<Number>,
}

/// A transformed plan plus anything the caller should know was guessed
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub plan: Plan,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
/// Transform
// ---------------------------------------------------------------------------

/// Parse a program description and flatten it into a plan
pub fn transform_program(value: &Value) -> Result<TransformOutput, ValidationError> {
    if !value.is_object() {
        return Err(ValidationError::for_value("program", value, "program must be an object"));
    }
    let program: ProgramDescription = serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::for_value("program", value, e.to_string()))?;
    Ok(transform_description(&program))
}

pub fn transform_description(program: &ProgramDescription) -> TransformOutput {
    let mut warnings = Vec::new();
    let mut exercises = Vec::new();

    for (index, block) in program.blocks.iter().enumerate() {
        exercises.extend(transform_block(block, index, &mut warnings));
    }

    let mut extra = Map::new();
    if let Some(total) = &program.total_duration_min {
        extra.insert("total_duration_min".into(), total.clone());
    }

    let plan = Plan {
        day_name: Some(
            program
                .theme
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DAY_NAME.to_string()),
        ),
        location: program.location.clone(),
        phase: program.phase.clone(),
        exercises,
        extra,
    };

    TransformOutput { plan, warnings }
}

/// Flatten one block. `index` is the block's position in the program.
pub fn transform_block(block: &Block, index: usize, warnings: &mut Vec<String>) -> Vec<Exercise> {
    let raw_type = block.block_type.clone().unwrap_or_default();
    let block_type = raw_type.parse::<BlockType>().unwrap_or_else(|_| {
        let message = format!(
            "block {} has unknown block_type '{}', treated as strength",
            index, raw_type
        );
        warn!(block = index, block_type = %raw_type, "unknown block type, treating as strength");
        warnings.push(message);
        BlockType::Other(raw_type.clone())
    });

    let entries = block.exercises.as_deref().filter(|e| !e.is_empty());
    let instructions = block.instructions.as_deref().filter(|i| !i.is_empty());

    match (entries, instructions) {
        (Some(entries), _) if block_type == BlockType::Warmup => {
            vec![warmup_checklist(block, index, entries)]
        }
        (Some(entries), _) => entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let id = format!("{}_{}_{}", block_type.id_prefix(), index, i + 1);
                block_entry(block, &block_type, id, entry, warnings)
            })
            .collect(),
        (None, Some(lines)) => vec![cardio_from_instructions(block, &block_type, index, lines)],
        (None, None) => {
            warn!(block = index, block_type = %block_type, "block has no exercises or instructions");
            warnings.push(format!(
                "block {} ({}) has no exercises or instructions",
                index, block_type
            ));
            Vec::new()
        }
    }
}

fn warmup_checklist(block: &Block, index: usize, entries: &[BlockExercise]) -> Exercise {
    let items = entries
        .iter()
        .map(|entry| {
            let name = entry_name(entry);
            match entry.reps.as_ref().and_then(value_text) {
                Some(reps) if reps.starts_with(|c: char| c.is_ascii_digit()) => {
                    format!("{} x{}", name, reps)
                }
                Some(reps) => format!("{} {}", name, reps),
                None => name,
            }
        })
        .collect();

    let name = block
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_WARMUP_NAME.to_string());

    let mut exercise = Exercise::new(
        format!("warmup_{}", index),
        name,
        ExerciseKind::Checklist { items },
    );
    exercise.guidance_note = block.rest_guidance.clone().filter(|r| !r.trim().is_empty());
    exercise
}

fn cardio_from_instructions(
    block: &Block,
    block_type: &BlockType,
    index: usize,
    lines: &[String],
) -> Exercise {
    let name = block
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CARDIO_NAME.to_string());
    let mut exercise = Exercise::new(
        format!("{}_{}_1", block_type.id_prefix(), index),
        name,
        ExerciseKind::Duration {
            target_duration_min: block.duration_min.clone(),
        },
    );
    exercise.guidance_note = Some(lines.join(" | "));
    exercise
}

fn block_entry(
    block: &Block,
    block_type: &BlockType,
    id: String,
    entry: &BlockExercise,
    warnings: &mut Vec<String>,
) -> Exercise {
    let target_reps = entry.reps.as_ref().and_then(rep_target);
    let target_sets = entry.sets.as_ref().and_then(set_count);

    let kind = match block_type {
        BlockType::Circuit | BlockType::Power => ExerciseKind::Circuit {
            target_sets: target_sets.or_else(|| block.rounds.as_ref().and_then(leading_count)),
            target_reps: target_reps.clone(),
        },
        BlockType::Cardio => ExerciseKind::Duration {
            target_duration_min: entry
                .duration_min
                .clone()
                .or_else(|| block.duration_min.clone()),
        },
        _ => ExerciseKind::Strength {
            target_sets,
            target_reps: target_reps.clone(),
        },
    };

    let mut notes = Vec::new();
    if let Some(tempo) = entry.tempo.as_ref().and_then(value_text) {
        notes.push(format!("Tempo {}", tempo));
    }
    notes.extend(non_empty(&entry.load_guide));
    notes.extend(non_empty(&entry.notes));
    if block_type.includes_rest_guidance() {
        notes.extend(non_empty(&block.rest_guidance));
    }

    let mut exercise = Exercise::new(id, entry_name(entry), kind);
    if !notes.is_empty() {
        exercise.guidance_note = Some(notes.join(". "));
    }

    if let Some(raw) = entry.equipment.as_deref().filter(|e| !e.trim().is_empty()) {
        match raw.parse::<Equipment>() {
            Ok(equipment) => exercise.equipment = Some(equipment),
            Err(reason) => {
                warn!(exercise = %exercise.id, equipment = raw, "ignoring unknown equipment");
                warnings.push(format!("{}: {}", exercise.id, reason));
            }
        }
    }
    let hides = exercise
        .equipment
        .map_or_else(|| is_bodyweight_or_band(&exercise.name), Equipment::hides_weight);
    if hides {
        exercise.hide_weight = Some(true);
    }
    if target_reps.as_ref().is_some_and(RepTarget::is_timed) {
        exercise.show_time = Some(true);
    }

    exercise
}

// ---------------------------------------------------------------------------
/// Field Helpers
// ---------------------------------------------------------------------------

fn entry_name(entry: &BlockExercise) -> String {
    entry
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNNAMED_EXERCISE.to_string())
}

fn non_empty(text: &Option<String>) -> Option<String> {
    text.clone().filter(|t| !t.trim().is_empty())
}

/// Strings and numbers as display text; anything else is absent
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn rep_target(value: &Value) -> Option<RepTarget> {
    match value {
        Value::Number(n) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(count) => Some(RepTarget::Count(count)),
            None => Some(RepTarget::Scheme(n.to_string())),
        },
        Value::String(s) if !s.trim().is_empty() => Some(RepTarget::Scheme(s.clone())),
        _ => None,
    }
}

/// `sets` as given; non-numeric but present values fall back to a default
fn set_count(value: &Value) -> Option<u32> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Number(n) if n.as_u64() == Some(0) => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => leading_count(other).or(Some(FALLBACK_SETS)),
    }
}

/// A positive count from a number or the leading digits of a string ("4 rounds")
fn leading_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok().filter(|v| *v > 0)
        }
        _ => None,
    }
}
