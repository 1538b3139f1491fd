//! Completion State Machine - `Pending → Completed`, strictly in sequence
//!
//! A trial may only be completed once, and only after its predecessor in the
//! run's total order. Both rules are checked before anything is written;
//! recording the values and stamping the completion date then happens in one
//! step on the exclusively borrowed run.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::experiment::{EventMeasureValue, Run, TrialMeasureValue, TrialPosition};
use crate::{Error, Result};

/// Values recorded with a trial completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRecord {
    /// Trial-level values
    pub trial_values: Vec<TrialMeasureValue>,
    /// One entry per event, in event order
    pub events: Vec<Vec<EventMeasureValue>>,
}

/// Check that the trial at `position` can be completed now.
///
/// # Errors
///
/// - [`Error::UnknownElement`] if the trial does not exist
/// - [`Error::ExperimentProgress`] if it is already completed or its
///   predecessor is not
pub fn check_completable(run: &Run, position: TrialPosition) -> Result<()> {
    let trial = run
        .trial(position)
        .ok_or_else(|| Error::unknown("trial", format!("{} ({position})", run.id())))?;
    if trial.is_completed() {
        return Err(Error::ExperimentProgress(format!(
            "Trial already completed: run {}, {position}.",
            run.id()
        )));
    }
    if let Some(previous) = run.previous_trial(position) {
        let done = run.trial(previous).is_some_and(|t| t.is_completed());
        if !done {
            return Err(Error::ExperimentProgress(format!(
                "Cannot complete run {}, {position}: previous trial ({previous}) is not completed.",
                run.id()
            )));
        }
    }
    Ok(())
}

/// Complete the trial at `position`, recording `record` and stamping `completed_at`.
///
/// Event numbers are assigned densely from 0 in the given order.
///
/// # Errors
///
/// See [`check_completable`]; nothing is written on error.
pub fn complete_trial(
    run: &mut Run,
    position: TrialPosition,
    record: CompletionRecord,
    completed_at: DateTime<Utc>,
) -> Result<()> {
    check_completable(run, position)?;
    let run_id = run.id().to_string();
    let trial = run
        .trial_mut(position)
        .ok_or_else(|| Error::unknown("trial", format!("{run_id} ({position})")))?;
    let event_count = record.events.len();
    trial.record(record.trial_values, record.events, completed_at);
    debug!(run = %run_id, %position, events = event_count, "trial completed");
    Ok(())
}
