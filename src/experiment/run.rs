//! Runs, blocks, trials and events - the executable part of an experiment
//!
//! ```text
//! Run (1) ──< Block (N, ordered by number)
//!                 └──< Trial (N, ordered by number)
//!                         └──< Event (N, numbered densely from 0)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventMeasureValue, TrialMeasureValue};
use crate::{Error, Result};

/// Address of a trial inside its run: `(block number, trial number)`.
///
/// The derived ordering is the run's total trial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrialPosition {
    /// Block number
    pub block: u32,
    /// Trial number within the block
    pub trial: u32,
}

impl TrialPosition {
    /// Create a trial position.
    #[must_use]
    pub const fn new(block: u32, trial: u32) -> Self {
        Self { block, trial }
    }
}

impl fmt::Display for TrialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}, trial {}", self.block, self.trial)
    }
}

/// Lowest non-negative number not already used.
fn free_number(used: impl Iterator<Item = u32>) -> u32 {
    let mut expected = 0;
    for number in used {
        if number != expected {
            break;
        }
        expected += 1;
    }
    expected
}

/// One participant's full pass through the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    id: String,
    token: Option<String>,
    blocks: BTreeMap<u32, Block>,
}

impl Run {
    /// Create an unlocked run without blocks.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: None,
            blocks: BTreeMap::new(),
        }
    }

    /// Add a block (builder style).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if the block number is taken.
    pub fn with_block(mut self, block: Block) -> Result<Self> {
        self.add_block(block)?;
        Ok(self)
    }

    /// Add a block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if the block number is taken.
    pub fn add_block(&mut self, block: Block) -> Result<&mut Block> {
        let number = block.number;
        if self.blocks.contains_key(&number) {
            return Err(Error::InvalidDesign(format!(
                "block {number} already exists in run {}",
                self.id
            )));
        }
        Ok(self.blocks.entry(number).or_insert(block))
    }

    /// Append a new empty block with the lowest free number.
    pub fn push_block(&mut self, practice: bool) -> &mut Block {
        let number = free_number(self.blocks.keys().copied());
        self.blocks
            .entry(number)
            .or_insert_with(|| Block::new(number).practice(practice))
    }

    /// Get the run ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the lock token, if the run is locked.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether a client currently holds the run.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn replace_token(&mut self, token: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.token, token)
    }

    /// Blocks in block-number order.
    pub fn blocks(&self) -> impl DoubleEndedIterator<Item = &Block> {
        self.blocks.values()
    }

    /// Look up a block by number.
    #[must_use]
    pub fn block(&self, number: u32) -> Option<&Block> {
        self.blocks.get(&number)
    }

    pub(crate) fn block_mut(&mut self, number: u32) -> Option<&mut Block> {
        self.blocks.get_mut(&number)
    }

    pub(crate) fn blocks_from(
        &self,
        number: u32,
    ) -> impl Iterator<Item = &Block> {
        self.blocks.range(number..).map(|(_, block)| block)
    }

    pub(crate) fn blocks_before(
        &self,
        number: u32,
    ) -> impl DoubleEndedIterator<Item = &Block> {
        self.blocks.range(..number).map(|(_, block)| block)
    }

    /// Look up a trial by position.
    #[must_use]
    pub fn trial(&self, position: TrialPosition) -> Option<&Trial> {
        self.block(position.block)
            .and_then(|block| block.trial(position.trial))
    }

    pub(crate) fn trial_mut(&mut self, position: TrialPosition) -> Option<&mut Trial> {
        self.block_mut(position.block)
            .and_then(|block| block.trials.get_mut(&position.trial))
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of trials across all blocks.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.blocks.values().map(Block::trial_count).sum()
    }

    /// Check numbering and completion sequencing of a (possibly replayed) run.
    ///
    /// Block and trial keys must equal their numbers, events are numbered
    /// densely from 0, and completed trials form a prefix of the run order.
    pub(crate) fn validate(&self) -> Result<()> {
        for (key, block) in &self.blocks {
            if *key != block.number {
                return Err(Error::InvalidDesign(format!(
                    "block stored as {key} has number {} in run {}",
                    block.number, self.id
                )));
            }
            for (key, trial) in &block.trials {
                if *key != trial.number {
                    return Err(Error::InvalidDesign(format!(
                        "trial stored as {key} has number {} in run {}, block {}",
                        trial.number, self.id, block.number
                    )));
                }
                let dense = (0_u32..)
                    .zip(&trial.events)
                    .all(|(expected, event)| event.number == expected);
                let keyed = trial.events.iter().all(|event| {
                    event
                        .measure_values
                        .iter()
                        .all(|(key, value)| key == value.measure_id())
                });
                if !dense || !keyed {
                    return Err(Error::InvalidDesign(format!(
                        "malformed events in run {}, block {}, trial {}",
                        self.id, block.number, trial.number
                    )));
                }
            }
        }

        let mut pending: Option<TrialPosition> = None;
        for (position, trial) in self.trials() {
            match (pending, trial.is_completed()) {
                (None, false) => pending = Some(position),
                (Some(first), true) => {
                    return Err(Error::InvalidDesign(format!(
                        "run {}: {position} is completed but {first} is not",
                        self.id
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// A contiguous group of trials sharing block-level factor overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    number: u32,
    practice: bool,
    factor_values: BTreeMap<String, String>,
    trials: BTreeMap<u32, Trial>,
}

impl Block {
    /// Create a non-practice block without overrides or trials.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self {
            number,
            practice: false,
            factor_values: BTreeMap::new(),
            trials: BTreeMap::new(),
        }
    }

    /// Mark the block as practice (excluded from measured numbering).
    #[must_use]
    pub const fn practice(mut self, practice: bool) -> Self {
        self.practice = practice;
        self
    }

    /// Override `factor` with `value` for every trial of the block.
    #[must_use]
    pub fn with_factor_value(mut self, factor: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_factor_value(factor, value);
        self
    }

    /// Override `factor` with `value`; replaces a previous override.
    pub fn set_factor_value(&mut self, factor: impl Into<String>, value: impl Into<String>) {
        self.factor_values.insert(factor.into(), value.into());
    }

    /// Add a trial (builder style).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if the trial number is taken.
    pub fn with_trial(mut self, trial: Trial) -> Result<Self> {
        self.add_trial(trial)?;
        Ok(self)
    }

    /// Add a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if the trial number is taken.
    pub fn add_trial(&mut self, trial: Trial) -> Result<&mut Trial> {
        let number = trial.number;
        if self.trials.contains_key(&number) {
            return Err(Error::InvalidDesign(format!(
                "trial {number} already exists in block {}",
                self.number
            )));
        }
        Ok(self.trials.entry(number).or_insert(trial))
    }

    /// Append a new trial with the lowest free number.
    pub fn push_trial(&mut self) -> &mut Trial {
        let number = free_number(self.trials.keys().copied());
        self.trials.entry(number).or_insert_with(|| Trial::new(number))
    }

    /// Get the block number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Whether this is a practice block.
    #[must_use]
    pub const fn is_practice(&self) -> bool {
        self.practice
    }

    /// Block-level overrides: factor ID → value ID.
    #[must_use]
    pub const fn factor_values(&self) -> &BTreeMap<String, String> {
        &self.factor_values
    }

    /// Trials in trial-number order.
    pub fn trials(&self) -> impl DoubleEndedIterator<Item = &Trial> {
        self.trials.values()
    }

    pub(crate) fn trials_after(&self, number: u32) -> impl Iterator<Item = &Trial> {
        self.trials
            .range((std::ops::Bound::Excluded(number), std::ops::Bound::Unbounded))
            .map(|(_, trial)| trial)
    }

    pub(crate) fn trials_before(&self, number: u32) -> impl DoubleEndedIterator<Item = &Trial> {
        self.trials.range(..number).map(|(_, trial)| trial)
    }

    /// Look up a trial by number.
    #[must_use]
    pub fn trial(&self, number: u32) -> Option<&Trial> {
        self.trials.get(&number)
    }

    /// Number of trials.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }
}

/// The smallest executable unit of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    number: u32,
    factor_values: BTreeMap<String, String>,
    completion_date: Option<DateTime<Utc>>,
    measure_values: Vec<TrialMeasureValue>,
    events: Vec<Event>,
}

/// Completion state of a trial. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    /// Not yet executed.
    Pending,
    /// Executed and recorded.
    Completed,
}

impl Trial {
    /// Create a pending trial without overrides.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self {
            number,
            factor_values: BTreeMap::new(),
            completion_date: None,
            measure_values: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Override `factor` with `value` for this trial.
    #[must_use]
    pub fn with_factor_value(mut self, factor: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_factor_value(factor, value);
        self
    }

    /// Override `factor` with `value`; replaces a previous override.
    pub fn set_factor_value(&mut self, factor: impl Into<String>, value: impl Into<String>) {
        self.factor_values.insert(factor.into(), value.into());
    }

    /// Get the trial number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Trial-level overrides: factor ID → value ID.
    #[must_use]
    pub const fn factor_values(&self) -> &BTreeMap<String, String> {
        &self.factor_values
    }

    /// When the trial was completed, if it was.
    #[must_use]
    pub const fn completion_date(&self) -> Option<DateTime<Utc>> {
        self.completion_date
    }

    /// Whether the trial has been completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }

    /// Current completion state.
    #[must_use]
    pub const fn state(&self) -> TrialState {
        if self.is_completed() {
            TrialState::Completed
        } else {
            TrialState::Pending
        }
    }

    /// Recorded trial-level measure values.
    #[must_use]
    pub fn measure_values(&self) -> &[TrialMeasureValue] {
        &self.measure_values
    }

    /// Recorded events in event-number order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Record results and stamp completion. Callers check sequencing first.
    pub(crate) fn record(
        &mut self,
        measure_values: Vec<TrialMeasureValue>,
        events: Vec<Vec<EventMeasureValue>>,
        completed_at: DateTime<Utc>,
    ) {
        self.measure_values.extend(measure_values);
        let first = u32::try_from(self.events.len()).unwrap_or(u32::MAX);
        for (number, values) in (first..).zip(events) {
            self.events.push(Event::new(number, values));
        }
        self.completion_date = Some(completed_at);
    }
}

/// A numbered sub-record of a trial carrying event-level measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    number: u32,
    measure_values: BTreeMap<String, EventMeasureValue>,
}

impl Event {
    fn new(number: u32, values: Vec<EventMeasureValue>) -> Self {
        let measure_values = values
            .into_iter()
            .map(|value| (value.measure_id().to_string(), value))
            .collect();
        Self {
            number,
            measure_values,
        }
    }

    /// Get the event number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Event-level values keyed by measure ID.
    #[must_use]
    pub const fn measure_values(&self) -> &BTreeMap<String, EventMeasureValue> {
        &self.measure_values
    }
}
