//! Progress service - the operations adapters call
//!
//! [`ProgressService`] ties the pieces together:
//!
//! ```text
//! lock_run ──► RunLockManager ─┐
//!                              ├─► ExperimentStore (one write guard per call)
//! submit_trial_result ─────────┤      token check → sequencing check →
//!                              │      measure registry → complete → publish
//! subscribe ──► CompletionNotifier (backlog + live trials)
//! ```
//!
//! Every mutating call validates first and writes second, inside the
//! experiment's write guard. Completed trials are published before that guard
//! is released, so listeners see them in commit order.
//!
//! ## Example
//!
//! ```rust
//! use lightmill_core::experiment::{Block, Experiment, Measure, Run, Trial};
//! use lightmill_core::{MeasureInput, ProgressService, TrialSubmission};
//!
//! # fn main() -> lightmill_core::Result<()> {
//! let service = ProgressService::builder().build();
//! let block = Block::new(0).with_trial(Trial::new(0))?;
//! service.import_experiment(
//!     Experiment::builder("E1", "Pointing")
//!         .measure(Measure::new("time", "Integer", true, false)?)
//!         .run(Run::new("S0").with_block(block)?)
//!         .build()?,
//! )?;
//!
//! let token = service.lock_run("E1", "S0")?;
//! let submission = TrialSubmission::new(&token).measures(MeasureInput::map([("time", 412)]));
//! let trial = service.submit_trial_result("E1", "S0", 0, 0, submission)?;
//! assert!(trial.is_completed());
//! assert!(service.current_trial("E1", "S0")?.is_none());
//! service.unlock_run("E1", "S0", &token)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::completion::{self, CompletionRecord};
use crate::config::Config;
use crate::experiment::{
    Block, Event, Experiment, Measure, MeasureUpdate, Run, Trial, TrialPosition,
};
use crate::lock::RunLockManager;
use crate::notify::{CompletionListener, CompletionNotifier, SubscriptionId};
use crate::payload::{flatten_measures, TrialSubmission};
use crate::registry::MeasureRegistry;
use crate::store::ExperimentStore;
use crate::views::{self, BlockInfo, BlockPlan, MeasureCatalog, RunInfo, TrialInfo};
use crate::{Error, Result};

fn locate_block<'a>(run: &'a Run, block_number: u32) -> Result<&'a Block> {
    run.block(block_number)
        .ok_or_else(|| Error::unknown("block", format!("{} (block {block_number})", run.id())))
}

fn locate_trial<'a>(run: &'a Run, position: TrialPosition) -> Result<(&'a Block, &'a Trial)> {
    let block = locate_block(run, position.block)?;
    let trial = block
        .trial(position.trial)
        .ok_or_else(|| Error::unknown("trial", format!("{} ({position})", run.id())))?;
    Ok((block, trial))
}

/// Experiment progress operations over a shared store.
#[derive(Debug)]
pub struct ProgressService {
    config: Config,
    store: Arc<ExperimentStore>,
    locks: RunLockManager,
    notifier: CompletionNotifier,
}

impl ProgressService {
    /// Create a service over an empty store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::builder().config(config).build()
    }

    /// Create a new service builder.
    #[must_use]
    pub fn builder() -> ProgressServiceBuilder {
        ProgressServiceBuilder::default()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying store (snapshots, direct reads).
    #[must_use]
    pub fn store(&self) -> &ExperimentStore {
        &self.store
    }

    /// Completion notifier.
    #[must_use]
    pub const fn notifier(&self) -> &CompletionNotifier {
        &self.notifier
    }

    // ---- Import & administration ------------------------------------------

    /// Import a complete experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] for an invalid design and
    /// [`Error::DuplicateExperiment`] if the ID is already imported.
    pub fn import_experiment(&self, experiment: Experiment) -> Result<()> {
        self.store.insert(experiment)
    }

    /// Remove an experiment with all its runs and drop its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn remove_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        // Under the removal's write guard: no subscribe or submission can
        // slip in between dropping the listeners and unlinking the slot
        let (removed, dropped) = self
            .store
            .remove_with(experiment_id, |_| self.notifier.drop_experiment(experiment_id))?;
        info!(experiment = experiment_id, subscriptions = dropped, "experiment subtree deleted");
        Ok(removed)
    }

    /// IDs of the imported experiments, sorted.
    #[must_use]
    pub fn experiment_ids(&self) -> Vec<String> {
        self.store.experiment_ids()
    }

    /// Clear a run's token without checking it. Returns the cleared token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn force_unlock(&self, experiment_id: &str, run_id: &str) -> Result<Option<String>> {
        self.store.write(experiment_id, |xp| {
            let run = xp.require_run_mut(run_id)?;
            Ok(self.locks.force_unlock(experiment_id, run))
        })
    }

    /// Register a new measure definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for a missing experiment and
    /// [`Error::InvalidDesign`] if the measure ID is taken.
    pub fn add_measure(&self, experiment_id: &str, measure: Measure) -> Result<()> {
        self.store
            .write(experiment_id, |xp| xp.add_measure(measure))
    }

    /// Update a measure definition and return the new version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for a missing experiment or measure
    /// and [`Error::InvalidDesign`] if the update would clear both levels.
    pub fn update_measure(
        &self,
        experiment_id: &str,
        measure_id: &str,
        update: MeasureUpdate,
    ) -> Result<Measure> {
        self.store.write(experiment_id, |xp| {
            xp.update_measure(measure_id, update).cloned()
        })
    }

    // ---- Run locking -------------------------------------------------------

    /// Lock a run and return its new token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for missing IDs and
    /// [`Error::RunAlreadyLocked`] if the run is locked (protected mode).
    pub fn lock_run(&self, experiment_id: &str, run_id: &str) -> Result<String> {
        self.store.write(experiment_id, |xp| {
            let run = xp.require_run_mut(run_id)?;
            self.locks.lock(experiment_id, run)
        })
    }

    /// Unlock a run with its token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`], [`Error::RunNotLocked`] or
    /// [`Error::WrongToken`]; the token is unchanged on error.
    pub fn unlock_run(&self, experiment_id: &str, run_id: &str, token: &str) -> Result<()> {
        self.store.write(experiment_id, |xp| {
            let run = xp.require_run_mut(run_id)?;
            self.locks.unlock(experiment_id, run, token)
        })
    }

    // ---- Read views --------------------------------------------------------

    /// First run (by ID) that is neither locked nor started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn available_run(&self, experiment_id: &str) -> Result<Option<RunInfo>> {
        self.store.read(experiment_id, |xp| {
            xp.runs()
                .find(|run| !run.is_locked() && !run.started())
                .map(|run| RunInfo::build(xp, run))
        })
    }

    /// Summary of one run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn run_info(&self, experiment_id: &str, run_id: &str) -> Result<RunInfo> {
        self.store
            .read(experiment_id, |xp| Ok(RunInfo::build(xp, xp.require_run(run_id)?)))?
    }

    /// Summary of every run of an experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn experiment_status(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        self.store
            .read(experiment_id, |xp| xp.runs().map(|run| RunInfo::build(xp, run)).collect())
    }

    /// Summary of one block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for missing IDs.
    pub fn block_info(&self, experiment_id: &str, run_id: &str, block: u32) -> Result<BlockInfo> {
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            Ok(BlockInfo::build(run, locate_block(run, block)?))
        })?
    }

    /// Resolved state of one trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for missing IDs.
    pub fn trial_info(
        &self,
        experiment_id: &str,
        run_id: &str,
        block: u32,
        trial: u32,
    ) -> Result<TrialInfo> {
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            let (block, trial) = locate_trial(run, TrialPosition::new(block, trial))?;
            Ok(TrialInfo::build(xp, run, block, trial))
        })?
    }

    /// The trial the run client should execute now, `None` once the run is completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn current_trial(&self, experiment_id: &str, run_id: &str) -> Result<Option<TrialInfo>> {
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            Ok(run
                .current_trial()
                .and_then(|position| TrialInfo::at(xp, run, position)))
        })?
    }

    /// The trial after the current one, `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn next_trial(&self, experiment_id: &str, run_id: &str) -> Result<Option<TrialInfo>> {
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            Ok(run
                .current_trial()
                .and_then(|position| run.next_trial(position))
                .and_then(|position| TrialInfo::at(xp, run, position)))
        })?
    }

    /// The design of a run, block by block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn run_plan(&self, experiment_id: &str, run_id: &str) -> Result<Vec<BlockPlan>> {
        self.store
            .read(experiment_id, |xp| Ok(views::run_plan(xp, xp.require_run(run_id)?)))?
    }

    /// Trials of a run in total order, optionally only the completed ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if the experiment or run does not exist.
    pub fn run_trials(
        &self,
        experiment_id: &str,
        run_id: &str,
        completed_only: bool,
    ) -> Result<Vec<TrialInfo>> {
        self.store
            .read(experiment_id, |xp| {
                let run = xp.require_run(run_id)?;
                Ok(completed_infos(xp, run, completed_only))
            })?
    }

    /// Measure definitions split by level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn measures_by_level(&self, experiment_id: &str) -> Result<MeasureCatalog> {
        self.store.read(experiment_id, MeasureCatalog::build)
    }

    /// Events recorded with a trial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for missing IDs.
    pub fn trial_events(
        &self,
        experiment_id: &str,
        run_id: &str,
        block: u32,
        trial: u32,
    ) -> Result<Vec<Event>> {
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            let (_, trial) = locate_trial(run, TrialPosition::new(block, trial))?;
            Ok(trial.events().to_vec())
        })?
    }

    // ---- Trial completion --------------------------------------------------

    /// Record the results of a trial and mark it completed.
    ///
    /// Checks, in order and before any write: the token, the trial's
    /// sequencing, every measure key. Then records the values, stamps the
    /// completion date and publishes the trial to the run's listeners.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownElement`] for missing IDs
    /// - [`Error::RunNotLocked`] / [`Error::WrongToken`] for a bad token
    /// - [`Error::ExperimentProgress`] for a completed or out-of-order trial
    /// - [`Error::WrongMeasureKey`] for an unknown or misplaced measure in strict mode
    pub fn submit_trial_result(
        &self,
        experiment_id: &str,
        run_id: &str,
        block: u32,
        trial: u32,
        submission: TrialSubmission,
    ) -> Result<TrialInfo> {
        let position = TrialPosition::new(block, trial);
        self.store.write(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            self.locks
                .check_write(experiment_id, run, &submission.token)?;
            completion::check_completable(run, position)?;

            let mut registry =
                MeasureRegistry::new(xp.measures(), self.config.add_missing_measures);
            let trial_values = flatten_measures(&submission.measures)
                .into_iter()
                .map(|(path, value)| registry.trial_value(&path, value))
                .collect::<Result<Vec<_>>>()?;
            let events = submission
                .events
                .iter()
                .map(|event| {
                    flatten_measures(event)
                        .into_iter()
                        .map(|(path, value)| registry.event_value(&path, value))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            let changes = registry.into_changes();

            xp.merge_measures(changes);
            let record = CompletionRecord {
                trial_values,
                events,
            };
            completion::complete_trial(xp.require_run_mut(run_id)?, position, record, Utc::now())?;

            let run = xp.require_run(run_id)?;
            let (block, trial) = locate_trial(run, position)?;
            let info = TrialInfo::build(xp, run, block, trial);
            self.notifier.publish(&info);
            Ok(info)
        })
    }

    // ---- Live completion feed ----------------------------------------------

    /// Subscribe to a run's completed trials.
    ///
    /// The listener first receives every trial already completed, then each
    /// new completion, in completion order. Must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for missing IDs and
    /// [`Error::NotifierUnavailable`] outside a tokio runtime.
    pub fn subscribe<L: CompletionListener>(
        &self,
        experiment_id: &str,
        run_id: &str,
        listener: L,
    ) -> Result<SubscriptionId> {
        // Read guard blocks completions until the listener is registered
        self.store.read(experiment_id, |xp| {
            let run = xp.require_run(run_id)?;
            let backlog = completed_infos(xp, run, true);
            self.notifier
                .subscribe_with_backlog(experiment_id, run_id, listener, backlog)
        })?
    }

    /// Cancel a subscription. Returns `false` if it was already cancelled.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.notifier.unsubscribe(subscription)
    }
}

impl Default for ProgressService {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn completed_infos(experiment: &Experiment, run: &Run, completed_only: bool) -> Vec<TrialInfo> {
    run.blocks()
        .flat_map(|block| {
            block
                .trials()
                .filter(move |trial| !completed_only || trial.is_completed())
                .map(move |trial| TrialInfo::build(experiment, run, block, trial))
        })
        .collect()
}

/// Builder for `ProgressService`.
#[derive(Debug, Default)]
pub struct ProgressServiceBuilder {
    config: Config,
    store: Option<Arc<ExperimentStore>>,
}

impl ProgressServiceBuilder {
    /// Set the configuration.
    #[must_use]
    pub const fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an existing (e.g. restored) store.
    #[must_use]
    pub fn store(mut self, store: Arc<ExperimentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the service.
    #[must_use]
    pub fn build(self) -> ProgressService {
        ProgressService {
            locks: RunLockManager::new(self.config.unprotected_runs),
            config: self.config,
            store: self.store.unwrap_or_default(),
            notifier: CompletionNotifier::new(),
        }
    }
}
