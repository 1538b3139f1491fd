//! Progress Tracker - derived queries over a run
//!
//! Trials of a run are totally ordered by `(block number, trial number)`.
//! The current trial is the first one without a completion date; a run whose
//! trials are all completed has no current trial.

use crate::experiment::{Block, Run, Trial, TrialPosition};

impl Run {
    /// All trials in total order with their position.
    pub fn trials(&self) -> impl Iterator<Item = (TrialPosition, &Trial)> {
        self.blocks().flat_map(|block| {
            block
                .trials()
                .map(move |trial| (TrialPosition::new(block.number(), trial.number()), trial))
        })
    }

    /// Completed trials in total order.
    pub fn completed_trials(&self) -> impl Iterator<Item = (TrialPosition, &Trial)> {
        self.trials().filter(|(_, trial)| trial.is_completed())
    }

    /// First trial without a completion date, `None` once the run is completed.
    #[must_use]
    pub fn current_trial(&self) -> Option<TrialPosition> {
        self.trials()
            .find(|(_, trial)| !trial.is_completed())
            .map(|(position, _)| position)
    }

    /// Trial following `position`, crossing block boundaries.
    #[must_use]
    pub fn next_trial(&self, position: TrialPosition) -> Option<TrialPosition> {
        if let Some(trial) = self
            .block(position.block)
            .and_then(|block| block.trials_after(position.trial).next())
        {
            return Some(TrialPosition::new(position.block, trial.number()));
        }
        self.blocks_from(position.block.checked_add(1)?)
            .find_map(first_position)
    }

    /// Trial preceding `position`, crossing block boundaries.
    #[must_use]
    pub fn previous_trial(&self, position: TrialPosition) -> Option<TrialPosition> {
        if let Some(trial) = self
            .block(position.block)
            .and_then(|block| block.trials_before(position.trial).next_back())
        {
            return Some(TrialPosition::new(position.block, trial.number()));
        }
        self.blocks_before(position.block)
            .rev()
            .find_map(last_position)
    }

    /// Ordinal of a non-practice block among the run's non-practice blocks.
    ///
    /// `None` for practice blocks and unknown block numbers.
    #[must_use]
    pub fn measured_block_number(&self, block_number: u32) -> Option<u32> {
        let block = self.block(block_number)?;
        if block.is_practice() {
            return None;
        }
        let preceding = self
            .blocks_before(block_number)
            .filter(|b| !b.is_practice())
            .count();
        u32::try_from(preceding).ok()
    }

    /// At least one trial has been completed.
    #[must_use]
    pub fn started(&self) -> bool {
        self.trials().any(|(_, trial)| trial.is_completed())
    }

    /// Every trial has been completed.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.trials().all(|(_, trial)| trial.is_completed())
    }
}

fn first_position(block: &Block) -> Option<TrialPosition> {
    block
        .trials()
        .next()
        .map(|trial| TrialPosition::new(block.number(), trial.number()))
}

fn last_position(block: &Block) -> Option<TrialPosition> {
    block
        .trials()
        .next_back()
        .map(|trial| TrialPosition::new(block.number(), trial.number()))
}
