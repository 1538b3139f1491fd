//! Measure Registry - the single gate between submitted keys and recorded values
//!
//! The registry reads the experiment's measure definitions and stages every
//! change it wants to make (auto-registered measures, promoted levels) in a
//! private overlay. Nothing touches the experiment until the caller takes the
//! staged changes with [`MeasureRegistry::into_changes`], so a submission that
//! fails halfway leaves the design untouched.
//!
//! | measure state            | strict            | permissive                     |
//! |--------------------------|-------------------|--------------------------------|
//! | exists, level set        | value             | value                          |
//! | exists, level missing    | `WrongMeasureKey` | promote level, `warn!`, value  |
//! | unknown                  | `WrongMeasureKey` | register `unregistered`, warn  |

use std::collections::BTreeMap;

use tracing::warn;

use crate::experiment::{EventMeasureValue, Measure, MeasureLevel, Scalar, TrialMeasureValue};
use crate::{Error, Result};

/// A validated measure value ready to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureValue {
    /// Trial-level value
    Trial(TrialMeasureValue),
    /// Event-level value
    Event(EventMeasureValue),
}

impl MeasureValue {
    fn build(measure: &Measure, level: MeasureLevel, value: Scalar) -> Result<Self> {
        Ok(match level {
            MeasureLevel::Trial => Self::Trial(TrialMeasureValue::new(measure, value)?),
            MeasureLevel::Event => Self::Event(EventMeasureValue::new(measure, value)?),
        })
    }

    /// Measure ID of the value.
    #[must_use]
    pub fn measure_id(&self) -> &str {
        match self {
            Self::Trial(v) => v.measure_id(),
            Self::Event(v) => v.measure_id(),
        }
    }
}

/// Validates measure keys against an experiment's definitions.
#[derive(Debug)]
pub struct MeasureRegistry<'a> {
    measures: &'a BTreeMap<String, Measure>,
    staged: BTreeMap<String, Measure>,
    allow_auto_register: bool,
}

impl<'a> MeasureRegistry<'a> {
    /// Create a registry over `measures`.
    #[must_use]
    pub const fn new(measures: &'a BTreeMap<String, Measure>, allow_auto_register: bool) -> Self {
        Self {
            measures,
            staged: BTreeMap::new(),
            allow_auto_register,
        }
    }

    /// Current definition of `id`, staged changes included.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&Measure> {
        self.staged.get(id).or_else(|| self.measures.get(id))
    }

    /// Resolve `id` at `level` and build the value object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongMeasureKey`] in strict mode when the measure is
    /// unknown or lacks `level`.
    pub fn resolve_measure(
        &mut self,
        id: &str,
        level: MeasureLevel,
        value: Scalar,
    ) -> Result<MeasureValue> {
        match self.lookup(id) {
            Some(measure) if measure.supports(level) => MeasureValue::build(measure, level, value),
            Some(measure) => {
                if !self.allow_auto_register {
                    return Err(Error::WrongMeasureKey(format!(
                        "Measure key '{id}' (value: '{value}') is not at the {level} level."
                    )));
                }
                let mut promoted = measure.clone();
                promoted.add_level(level);
                warn!(
                    measure = id,
                    %level,
                    %value,
                    "measure was not at the {level} level, level added"
                );
                self.stage(promoted, level, value)
            }
            None => {
                if !self.allow_auto_register {
                    return Err(Error::WrongMeasureKey(format!(
                        "Invalid {level} measure key: '{id}' (value: '{value}')"
                    )));
                }
                warn!(
                    measure = id,
                    %level,
                    %value,
                    "unknown {level} measure key, new measure type registered"
                );
                self.stage(Measure::unregistered(id, level), level, value)
            }
        }
    }

    fn stage(&mut self, measure: Measure, level: MeasureLevel, value: Scalar) -> Result<MeasureValue> {
        let built = MeasureValue::build(&measure, level, value)?;
        self.staged.insert(measure.id().to_string(), measure);
        Ok(built)
    }

    /// Resolve a trial-level value.
    ///
    /// # Errors
    ///
    /// See [`MeasureRegistry::resolve_measure`].
    pub fn trial_value(&mut self, id: &str, value: Scalar) -> Result<TrialMeasureValue> {
        match self.resolve_measure(id, MeasureLevel::Trial, value)? {
            MeasureValue::Trial(v) => Ok(v),
            MeasureValue::Event(_) => Err(Error::MeasureLevel {
                measure: id.to_string(),
                level: MeasureLevel::Trial,
            }),
        }
    }

    /// Resolve an event-level value.
    ///
    /// # Errors
    ///
    /// See [`MeasureRegistry::resolve_measure`].
    pub fn event_value(&mut self, id: &str, value: Scalar) -> Result<EventMeasureValue> {
        match self.resolve_measure(id, MeasureLevel::Event, value)? {
            MeasureValue::Event(v) => Ok(v),
            MeasureValue::Trial(_) => Err(Error::MeasureLevel {
                measure: id.to_string(),
                level: MeasureLevel::Event,
            }),
        }
    }

    /// Whether any definition change is staged.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Staged definitions (new or promoted measures).
    #[must_use]
    pub fn into_changes(self) -> Vec<Measure> {
        self.staged.into_values().collect()
    }
}
