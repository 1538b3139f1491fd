//! Read views returned to adapters
//!
//! Plain serializable snapshots built from the entity tree. Field names are
//! camelCase so adapters can hand them out as JSON unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::{Block, Experiment, Run, Scalar, Trial, TrialPosition};
use crate::resolve::resolve_factor_values;

/// Resolved state of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialInfo {
    /// Experiment ID
    pub experiment_id: String,
    /// Run ID
    pub run_id: String,
    /// Raw block number
    pub block_number: u32,
    /// Block number among non-practice blocks, `None` for practice
    pub measured_block_number: Option<u32>,
    /// Trial number within the block
    pub number: u32,
    /// Whether the block is a practice block
    pub practice: bool,
    /// Resolved factor values: factor ID → value ID
    pub factor_values: BTreeMap<String, String>,
    /// Factors no layer sets
    pub missing_factors: Vec<String>,
    /// Recorded trial-level values: measure ID → value
    pub measures: BTreeMap<String, Scalar>,
    /// Completion date, `None` while pending
    pub completion_date: Option<DateTime<Utc>>,
}

impl TrialInfo {
    pub(crate) fn build(experiment: &Experiment, run: &Run, block: &Block, trial: &Trial) -> Self {
        let (factor_values, missing_factors) =
            resolve_factor_values(experiment, block, trial).into_parts();
        Self {
            experiment_id: experiment.id().to_string(),
            run_id: run.id().to_string(),
            block_number: block.number(),
            measured_block_number: run.measured_block_number(block.number()),
            number: trial.number(),
            practice: block.is_practice(),
            factor_values,
            missing_factors,
            measures: trial
                .measure_values()
                .iter()
                .map(|v| (v.measure_id().to_string(), v.value().clone()))
                .collect(),
            completion_date: trial.completion_date(),
        }
    }

    pub(crate) fn at(experiment: &Experiment, run: &Run, position: TrialPosition) -> Option<Self> {
        let block = run.block(position.block)?;
        let trial = block.trial(position.trial)?;
        Some(Self::build(experiment, run, block, trial))
    }

    /// Position of the trial in its run.
    #[must_use]
    pub const fn position(&self) -> TrialPosition {
        TrialPosition::new(self.block_number, self.number)
    }

    /// Whether the trial has been completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    /// Run ID
    pub id: String,
    /// Experiment ID
    pub experiment_id: String,
    /// At least one trial completed
    pub started: bool,
    /// All trials completed
    pub completed: bool,
    /// A client holds the lock
    pub locked: bool,
    /// Number of trials
    pub trial_count: usize,
    /// Number of blocks
    pub block_count: usize,
}

impl RunInfo {
    pub(crate) fn build(experiment: &Experiment, run: &Run) -> Self {
        Self {
            id: run.id().to_string(),
            experiment_id: experiment.id().to_string(),
            started: run.started(),
            completed: run.completed(),
            locked: run.is_locked(),
            trial_count: run.trial_count(),
            block_count: run.block_count(),
        }
    }
}

/// Summary of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    /// Raw block number
    pub number: u32,
    /// Block number among non-practice blocks
    pub measured_block_number: Option<u32>,
    /// Practice block
    pub practice: bool,
    /// Block-level overrides
    pub factor_values: BTreeMap<String, String>,
    /// Number of trials
    pub trial_count: usize,
}

impl BlockInfo {
    pub(crate) fn build(run: &Run, block: &Block) -> Self {
        Self {
            number: block.number(),
            measured_block_number: run.measured_block_number(block.number()),
            practice: block.is_practice(),
            factor_values: block.factor_values().clone(),
            trial_count: block.trial_count(),
        }
    }
}

/// One trial of a run plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialPlan {
    /// Trial number
    pub number: u32,
    /// Resolved factor values
    pub factor_values: BTreeMap<String, String>,
    /// Completion date, `None` while pending
    pub completion_date: Option<DateTime<Utc>>,
}

/// One block of a run plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPlan {
    /// Raw block number
    pub number: u32,
    /// Block number among non-practice blocks
    pub measured_block_number: Option<u32>,
    /// Practice block
    pub practice: bool,
    /// Block-level overrides
    pub factor_values: BTreeMap<String, String>,
    /// Trials in order
    pub trials: Vec<TrialPlan>,
}

/// The full design of a run, block by block.
pub(crate) fn run_plan(experiment: &Experiment, run: &Run) -> Vec<BlockPlan> {
    let mut measured = 0;
    run.blocks()
        .map(|block| {
            let measured_block_number = if block.is_practice() {
                None
            } else {
                measured += 1;
                Some(measured - 1)
            };
            BlockPlan {
                number: block.number(),
                measured_block_number,
                practice: block.is_practice(),
                factor_values: block.factor_values().clone(),
                trials: block
                    .trials()
                    .map(|trial| TrialPlan {
                        number: trial.number(),
                        factor_values: resolve_factor_values(experiment, block, trial)
                            .into_parts()
                            .0,
                        completion_date: trial.completion_date(),
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Measure IDs and names split by level, sorted by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureCatalog {
    /// Trial-level measures: ID → name
    pub trial_level: BTreeMap<String, Option<String>>,
    /// Event-level measures: ID → name
    pub event_level: BTreeMap<String, Option<String>>,
}

impl MeasureCatalog {
    pub(crate) fn build(experiment: &Experiment) -> Self {
        let mut catalog = Self::default();
        for measure in experiment.measures().values() {
            let name = measure.name().map(ToString::to_string);
            if measure.trial_level() {
                catalog
                    .trial_level
                    .insert(measure.id().to_string(), name.clone());
            }
            if measure.event_level() {
                catalog.event_level.insert(measure.id().to_string(), name);
            }
        }
        catalog
    }
}
