//! Measures - dependent variables and their recorded values

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Level at which a measure can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureLevel {
    /// Once per trial.
    Trial,
    /// Once per event inside a trial.
    Event,
}

impl MeasureLevel {
    /// Lowercase name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MeasureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasureLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trial" => Ok(Self::Trial),
            "event" => Ok(Self::Event),
            other => Err(Error::InvalidMeasureLevel(other.to_string())),
        }
    }
}

/// A recorded scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Measure type assigned to measures created by auto-registration.
pub const UNREGISTERED_TYPE: &str = "unregistered";

/// A dependent variable of the experiment.
///
/// Invariant: at least one of `trial_level` / `event_level` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    id: String,
    name: Option<String>,
    #[serde(rename = "type")]
    measure_type: String,
    trial_level: bool,
    event_level: bool,
}

impl Measure {
    /// Create a measure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if neither level is set.
    pub fn new(
        id: impl Into<String>,
        measure_type: impl Into<String>,
        trial_level: bool,
        event_level: bool,
    ) -> Result<Self> {
        Self::builder(id, measure_type)
            .trial_level(trial_level)
            .event_level(event_level)
            .build()
    }

    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, measure_type: impl Into<String>) -> MeasureBuilder {
        MeasureBuilder::new(id, measure_type)
    }

    pub(crate) fn unregistered(id: impl Into<String>, level: MeasureLevel) -> Self {
        Self {
            id: id.into(),
            name: None,
            measure_type: UNREGISTERED_TYPE.to_string(),
            trial_level: level == MeasureLevel::Trial,
            event_level: level == MeasureLevel::Event,
        }
    }

    /// Get the measure ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the semantic type tag.
    #[must_use]
    pub fn measure_type(&self) -> &str {
        &self.measure_type
    }

    /// Recordable once per trial.
    #[must_use]
    pub const fn trial_level(&self) -> bool {
        self.trial_level
    }

    /// Recordable once per event.
    #[must_use]
    pub const fn event_level(&self) -> bool {
        self.event_level
    }

    /// Whether the measure can be recorded at `level`.
    #[must_use]
    pub const fn supports(&self, level: MeasureLevel) -> bool {
        match level {
            MeasureLevel::Trial => self.trial_level,
            MeasureLevel::Event => self.event_level,
        }
    }

    /// Levels the measure can be recorded at.
    #[must_use]
    pub fn levels(&self) -> Vec<MeasureLevel> {
        [MeasureLevel::Trial, MeasureLevel::Event]
            .into_iter()
            .filter(|level| self.supports(*level))
            .collect()
    }

    pub(crate) fn add_level(&mut self, level: MeasureLevel) {
        match level {
            MeasureLevel::Trial => self.trial_level = true,
            MeasureLevel::Event => self.event_level = true,
        }
    }

    pub(crate) fn apply(&mut self, update: MeasureUpdate) -> Result<()> {
        let trial_level = update.trial_level.unwrap_or(self.trial_level);
        let event_level = update.event_level.unwrap_or(self.event_level);
        if !trial_level && !event_level {
            return Err(Error::InvalidDesign(format!(
                "measure {} must keep at least one level",
                self.id
            )));
        }
        self.trial_level = trial_level;
        self.event_level = event_level;
        if let Some(name) = update.name {
            self.name = Some(name);
        }
        if let Some(measure_type) = update.measure_type {
            self.measure_type = measure_type;
        }
        Ok(())
    }
}

/// Builder for `Measure`.
#[derive(Debug)]
pub struct MeasureBuilder {
    id: String,
    name: Option<String>,
    measure_type: String,
    trial_level: bool,
    event_level: bool,
}

impl MeasureBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, measure_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            measure_type: measure_type.into(),
            trial_level: false,
            event_level: false,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allow recording once per trial.
    #[must_use]
    pub const fn trial_level(mut self, enabled: bool) -> Self {
        self.trial_level = enabled;
        self
    }

    /// Allow recording once per event.
    #[must_use]
    pub const fn event_level(mut self, enabled: bool) -> Self {
        self.event_level = enabled;
        self
    }

    /// Build the `Measure`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if neither level is set.
    pub fn build(self) -> Result<Measure> {
        if !self.trial_level && !self.event_level {
            return Err(Error::InvalidDesign(format!(
                "measure {} must be recordable at the trial or event level",
                self.id
            )));
        }
        Ok(Measure {
            id: self.id,
            name: self.name,
            measure_type: self.measure_type,
            trial_level: self.trial_level,
            event_level: self.event_level,
        })
    }
}

/// Partial update of a measure definition. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeasureUpdate {
    /// New display name
    pub name: Option<String>,
    /// New type tag
    #[serde(rename = "type")]
    pub measure_type: Option<String>,
    /// New trial-level flag
    pub trial_level: Option<bool>,
    /// New event-level flag
    pub event_level: Option<bool>,
}

/// A trial-level `(measure, value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialMeasureValue {
    measure_id: String,
    value: Scalar,
}

impl TrialMeasureValue {
    /// Record `value` for a trial-level measure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MeasureLevel`] if `measure` is not trial-level.
    pub fn new(measure: &Measure, value: impl Into<Scalar>) -> Result<Self> {
        if !measure.trial_level() {
            return Err(Error::MeasureLevel {
                measure: measure.id().to_string(),
                level: MeasureLevel::Trial,
            });
        }
        Ok(Self {
            measure_id: measure.id().to_string(),
            value: value.into(),
        })
    }

    /// Get the measure ID.
    #[must_use]
    pub fn measure_id(&self) -> &str {
        &self.measure_id
    }

    /// Get the recorded value.
    #[must_use]
    pub const fn value(&self) -> &Scalar {
        &self.value
    }
}

/// An event-level `(measure, value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeasureValue {
    measure_id: String,
    value: Scalar,
}

impl EventMeasureValue {
    /// Record `value` for an event-level measure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MeasureLevel`] if `measure` is not event-level.
    pub fn new(measure: &Measure, value: impl Into<Scalar>) -> Result<Self> {
        if !measure.event_level() {
            return Err(Error::MeasureLevel {
                measure: measure.id().to_string(),
                level: MeasureLevel::Event,
            });
        }
        Ok(Self {
            measure_id: measure.id().to_string(),
            value: value.into(),
        })
    }

    /// Get the measure ID.
    #[must_use]
    pub fn measure_id(&self) -> &str {
        &self.measure_id
    }

    /// Get the recorded value.
    #[must_use]
    pub const fn value(&self) -> &Scalar {
        &self.value
    }
}
