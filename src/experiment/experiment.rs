//! Experiment - root entity of the design tree

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Block, Factor, Measure, MeasureLevel, MeasureUpdate, Run, Trial};
use crate::{Error, Result};

/// A complete experiment design and its progress.
///
/// Owns its factors, measures and runs; removing the experiment removes the
/// whole subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    id: String,
    name: String,
    author: Option<String>,
    description: Option<String>,
    factors: Vec<Factor>,
    measures: BTreeMap<String, Measure>,
    runs: BTreeMap<String, Run>,
}

impl Experiment {
    /// Create an empty experiment with the given ID and name.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author: None,
            description: None,
            factors: Vec::new(),
            measures: BTreeMap::new(),
            runs: BTreeMap::new(),
        }
    }

    /// Create a builder for constructing an experiment with optional fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the author, if any.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Get the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Factors in declaration order.
    #[must_use]
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Look up a factor by ID.
    #[must_use]
    pub fn factor(&self, factor_id: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.id() == factor_id)
    }

    /// Measures keyed by ID.
    #[must_use]
    pub const fn measures(&self) -> &BTreeMap<String, Measure> {
        &self.measures
    }

    /// Look up a measure by ID.
    #[must_use]
    pub fn measure(&self, measure_id: &str) -> Option<&Measure> {
        self.measures.get(measure_id)
    }

    /// Runs in run-ID order.
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    /// Look up a run by ID.
    #[must_use]
    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.get(run_id)
    }

    /// Look up a run, failing with `UnknownElement`.
    pub(crate) fn require_run(&self, run_id: &str) -> Result<&Run> {
        self.run(run_id).ok_or_else(|| Error::unknown("run", run_id))
    }

    pub(crate) fn require_run_mut(&mut self, run_id: &str) -> Result<&mut Run> {
        self.runs
            .get_mut(run_id)
            .ok_or_else(|| Error::unknown("run", run_id))
    }

    /// Number of runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Register a new measure definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if the ID is already registered.
    pub fn add_measure(&mut self, measure: Measure) -> Result<()> {
        if self.measures.contains_key(measure.id()) {
            return Err(Error::InvalidDesign(format!(
                "measure {} already exists in experiment {}",
                measure.id(),
                self.id
            )));
        }
        self.measures.insert(measure.id().to_string(), measure);
        Ok(())
    }

    /// Update an existing measure definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] for a missing measure and
    /// [`Error::InvalidDesign`] if the update would clear both levels.
    pub fn update_measure(&mut self, measure_id: &str, update: MeasureUpdate) -> Result<&Measure> {
        let measure = self
            .measures
            .get_mut(measure_id)
            .ok_or_else(|| Error::unknown("measure", measure_id))?;
        measure.apply(update)?;
        Ok(measure)
    }

    /// Insert or replace measure definitions staged by the measure registry.
    pub(crate) fn merge_measures(&mut self, measures: impl IntoIterator<Item = Measure>) {
        for measure in measures {
            self.measures.insert(measure.id().to_string(), measure);
        }
    }

    /// Check the structural invariants of the design.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] describing the first violation:
    /// duplicate factor IDs, an invalid default value, an override naming an
    /// unknown factor or value, or a measure without a level.
    ///
    /// Recorded progress is checked as well: block and trial numbers must
    /// match their keys, completed trials must precede every pending one, and
    /// each stored value must belong to a measure recordable at its level.
    pub fn validate(&self) -> Result<()> {
        for (i, factor) in self.factors.iter().enumerate() {
            if self.factors[..i].iter().any(|f| f.id() == factor.id()) {
                return Err(Error::InvalidDesign(format!(
                    "duplicate factor {} in experiment {}",
                    factor.id(),
                    self.id
                )));
            }
            factor.validate()?;
        }
        for (id, measure) in &self.measures {
            if id != measure.id() {
                return Err(Error::InvalidDesign(format!(
                    "measure registered as {id} has id {}",
                    measure.id()
                )));
            }
            if !measure.trial_level() && !measure.event_level() {
                return Err(Error::InvalidDesign(format!(
                    "measure {id} must be recordable at the trial or event level"
                )));
            }
        }
        for (id, run) in &self.runs {
            if id != run.id() {
                return Err(Error::InvalidDesign(format!(
                    "run registered as {id} has id {}",
                    run.id()
                )));
            }
            run.validate()?;
            for block in run.blocks() {
                self.check_overrides(block.factor_values().iter(), run, block, None)?;
                for trial in block.trials() {
                    self.check_overrides(
                        trial.factor_values().iter(),
                        run,
                        block,
                        Some(trial.number()),
                    )?;
                    self.check_recorded_values(run, block, trial)?;
                }
            }
        }
        Ok(())
    }

    fn check_recorded_values(&self, run: &Run, block: &Block, trial: &Trial) -> Result<()> {
        let trial_ids = trial
            .measure_values()
            .iter()
            .map(|value| (value.measure_id(), MeasureLevel::Trial));
        let event_ids = trial.events().iter().flat_map(|event| {
            event
                .measure_values()
                .values()
                .map(|value| (value.measure_id(), MeasureLevel::Event))
        });
        for (measure_id, level) in trial_ids.chain(event_ids) {
            let recordable = self
                .measure(measure_id)
                .is_some_and(|measure| measure.supports(level));
            if !recordable {
                return Err(Error::InvalidDesign(format!(
                    "stored value of {measure_id} is not recordable at {level} level (run {}, block {}, trial {})",
                    run.id(),
                    block.number(),
                    trial.number()
                )));
            }
        }
        Ok(())
    }

    fn check_overrides<'a>(
        &self,
        overrides: impl Iterator<Item = (&'a String, &'a String)>,
        run: &Run,
        block: &Block,
        trial: Option<u32>,
    ) -> Result<()> {
        for (factor_id, value_id) in overrides {
            let known = self
                .factor(factor_id)
                .is_some_and(|factor| factor.value(value_id).is_some());
            if !known {
                let location = trial.map_or_else(
                    || format!("run {}, block {}", run.id(), block.number()),
                    |t| format!("run {}, block {}, trial {t}", run.id(), block.number()),
                );
                return Err(Error::InvalidDesign(format!(
                    "unknown factor value {factor_id}={value_id} at {location}"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment: Experiment,
    duplicate_run: Option<String>,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment: Experiment::new(id, name),
            duplicate_run: None,
        }
    }

    /// Set the author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.experiment.author = Some(author.into());
        self
    }

    /// Set the free-text description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.experiment.description = Some(description.into());
        self
    }

    /// Append a factor.
    #[must_use]
    pub fn factor(mut self, factor: Factor) -> Self {
        self.experiment.factors.push(factor);
        self
    }

    /// Register a measure (replaces a measure with the same ID).
    #[must_use]
    pub fn measure(mut self, measure: Measure) -> Self {
        self.experiment
            .measures
            .insert(measure.id().to_string(), measure);
        self
    }

    /// Add a run.
    #[must_use]
    pub fn run(mut self, run: Run) -> Self {
        if self.experiment.runs.contains_key(run.id()) {
            self.duplicate_run.get_or_insert_with(|| run.id().to_string());
        } else {
            self.experiment.runs.insert(run.id().to_string(), run);
        }
        self
    }

    /// Build and validate the `Experiment`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if a run ID is repeated or
    /// [`Experiment::validate`] fails.
    pub fn build(self) -> Result<Experiment> {
        if let Some(run_id) = self.duplicate_run {
            return Err(Error::InvalidDesign(format!(
                "duplicate run {run_id} in experiment {}",
                self.experiment.id
            )));
        }
        self.experiment.validate()?;
        Ok(self.experiment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_factor() -> Factor {
        Factor::builder("size", "String")
            .value("small")
            .value("big")
            .default_value("small")
            .build()
            .unwrap()
    }

    #[test]
    fn test_experiment_builder() {
        let experiment = Experiment::builder("E1", "Pointing")
            .author("Q. R.")
            .description("Fitts' law study")
            .factor(size_factor())
            .measure(Measure::new("time", "Integer", true, false).unwrap())
            .run(Run::new("S0"))
            .build()
            .unwrap();

        assert_eq!(experiment.id(), "E1");
        assert_eq!(experiment.author(), Some("Q. R."));
        assert!(experiment.factor("size").is_some());
        assert!(experiment.measure("time").is_some());
        assert_eq!(experiment.run_count(), 1);
    }

    #[test]
    fn test_unknown_override_rejected() {
        let run = Run::new("S0")
            .with_block(Block::new(0).with_factor_value("size", "huge"))
            .unwrap();
        let err = Experiment::builder("E1", "Pointing")
            .factor(size_factor())
            .run(run)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("size=huge"));
    }

    #[test]
    fn test_unknown_trial_override_factor_rejected() {
        let block = Block::new(0)
            .with_trial(Trial::new(0).with_factor_value("color", "red"))
            .unwrap();
        let run = Run::new("S0").with_block(block).unwrap();
        let result = Experiment::builder("E1", "Pointing")
            .factor(size_factor())
            .run(run)
            .build();
        assert!(matches!(result, Err(Error::InvalidDesign(_))));
    }

    #[test]
    fn test_duplicate_run_rejected() {
        let result = Experiment::builder("E1", "Pointing")
            .run(Run::new("S0"))
            .run(Run::new("S0"))
            .build();
        assert!(matches!(result, Err(Error::InvalidDesign(_))));
    }

    #[test]
    fn test_duplicate_factor_rejected() {
        let result = Experiment::builder("E1", "Pointing")
            .factor(size_factor())
            .factor(size_factor())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_add_and_update_measure() {
        let mut experiment = Experiment::new("E1", "Pointing");
        experiment
            .add_measure(Measure::new("m1", "Integer", true, false).unwrap())
            .unwrap();
        assert!(experiment
            .add_measure(Measure::new("m1", "Integer", true, false).unwrap())
            .is_err());

        let update = MeasureUpdate {
            name: Some("Execution".to_string()),
            event_level: Some(true),
            ..MeasureUpdate::default()
        };
        let measure = experiment.update_measure("m1", update).unwrap();
        assert!(measure.event_level());
        assert_eq!(measure.name(), Some("Execution"));

        let err = experiment
            .update_measure("missing", MeasureUpdate::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownElement { .. }));
    }
}
