//! Value Resolver - effective factor values of a trial
//!
//! Three override layers, highest priority first:
//!
//! 1. the trial's own factor values
//! 2. the owning block's factor values
//! 3. the factor's default value (experiment level)
//!
//! A factor that none of the layers sets is reported as missing, never
//! silently omitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::experiment::{Block, Experiment, Trial, TrialPosition};
use crate::{Error, Result};

/// Outcome of resolving one factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFactor<'a> {
    /// The factor resolved to this value ID.
    Value(&'a str),
    /// No layer sets the factor.
    Missing,
    /// The experiment has no such factor.
    Unknown,
}

/// Layer a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Trial override
    Trial,
    /// Block override
    Block,
    /// Factor default
    Default,
}

/// Effective factor values of one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorResolution {
    values: BTreeMap<String, String>,
    sources: BTreeMap<String, ValueSource>,
    missing: Vec<String>,
}

impl FactorResolution {
    /// Resolution of `factor_id`.
    #[must_use]
    pub fn get(&self, factor_id: &str) -> ResolvedFactor<'_> {
        if let Some(value) = self.values.get(factor_id) {
            ResolvedFactor::Value(value)
        } else if self.missing.iter().any(|f| f == factor_id) {
            ResolvedFactor::Missing
        } else {
            ResolvedFactor::Unknown
        }
    }

    /// Layer that supplied the value of `factor_id`.
    #[must_use]
    pub fn source(&self, factor_id: &str) -> Option<ValueSource> {
        self.sources.get(factor_id).copied()
    }

    /// Resolved values: factor ID → value ID.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Factors without a value, in declaration order.
    #[must_use]
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Whether every factor resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Split into `(values, missing)`.
    #[must_use]
    pub fn into_parts(self) -> (BTreeMap<String, String>, Vec<String>) {
        (self.values, self.missing)
    }
}

/// Resolve every factor of `experiment` for `trial` inside `block`.
#[must_use]
pub fn resolve_factor_values(
    experiment: &Experiment,
    block: &Block,
    trial: &Trial,
) -> FactorResolution {
    let mut resolution = FactorResolution::default();
    for factor in experiment.factors() {
        let id = factor.id();
        let layered = trial
            .factor_values()
            .get(id)
            .map(|v| (v.as_str(), ValueSource::Trial))
            .or_else(|| {
                block
                    .factor_values()
                    .get(id)
                    .map(|v| (v.as_str(), ValueSource::Block))
            })
            .or_else(|| factor.default_value().map(|v| (v.id(), ValueSource::Default)));

        match layered {
            Some((value, source)) => {
                resolution.values.insert(id.to_string(), value.to_string());
                resolution.sources.insert(id.to_string(), source);
            }
            None => resolution.missing.push(id.to_string()),
        }
    }
    resolution
}

/// Resolve the factor values of the trial at `position` in run `run_id`.
///
/// # Errors
///
/// Returns [`Error::UnknownElement`] if the run, block or trial does not exist.
pub fn resolve_at(
    experiment: &Experiment,
    run_id: &str,
    position: TrialPosition,
) -> Result<FactorResolution> {
    let run = experiment.require_run(run_id)?;
    let block = run
        .block(position.block)
        .ok_or_else(|| Error::unknown("block", position.block.to_string()))?;
    let trial = block
        .trial(position.trial)
        .ok_or_else(|| Error::unknown("trial", position.to_string()))?;
    Ok(resolve_factor_values(experiment, block, trial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Factor, Run};

    fn experiment(block: Block) -> Experiment {
        Experiment::builder("E1", "Pointing")
            .factor(
                Factor::builder("size", "String")
                    .value("small")
                    .value("big")
                    .value("huge")
                    .default_value("small")
                    .build()
                    .unwrap(),
            )
            .factor(
                Factor::builder("device", "String")
                    .value("mouse")
                    .value("touch")
                    .build()
                    .unwrap(),
            )
            .run(Run::new("S0").with_block(block).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_block_overrides_default() {
        let block = Block::new(0)
            .with_factor_value("size", "big")
            .with_trial(Trial::new(0))
            .unwrap();
        let xp = experiment(block);
        let resolution = resolve_at(&xp, "S0", TrialPosition::new(0, 0)).unwrap();
        assert_eq!(resolution.get("size"), ResolvedFactor::Value("big"));
        assert_eq!(resolution.source("size"), Some(ValueSource::Block));
    }

    #[test]
    fn test_trial_overrides_block() {
        let block = Block::new(0)
            .with_factor_value("size", "big")
            .with_trial(Trial::new(0).with_factor_value("size", "huge"))
            .unwrap();
        let xp = experiment(block);
        let resolution = resolve_at(&xp, "S0", TrialPosition::new(0, 0)).unwrap();
        assert_eq!(resolution.get("size"), ResolvedFactor::Value("huge"));
        assert_eq!(resolution.source("size"), Some(ValueSource::Trial));
    }

    #[test]
    fn test_default_applies_without_overrides() {
        let block = Block::new(0).with_trial(Trial::new(0)).unwrap();
        let xp = experiment(block);
        let resolution = resolve_at(&xp, "S0", TrialPosition::new(0, 0)).unwrap();
        assert_eq!(resolution.get("size"), ResolvedFactor::Value("small"));
        assert_eq!(resolution.source("size"), Some(ValueSource::Default));
    }

    #[test]
    fn test_missing_factor_reported() {
        let block = Block::new(0).with_trial(Trial::new(0)).unwrap();
        let xp = experiment(block);
        let resolution = resolve_at(&xp, "S0", TrialPosition::new(0, 0)).unwrap();
        assert_eq!(resolution.get("device"), ResolvedFactor::Missing);
        assert_eq!(resolution.get("color"), ResolvedFactor::Unknown);
        assert_eq!(resolution.missing(), ["device".to_string()]);
        assert!(!resolution.is_complete());
    }

    #[test]
    fn test_unknown_position() {
        let block = Block::new(0).with_trial(Trial::new(0)).unwrap();
        let xp = experiment(block);
        let err = resolve_at(&xp, "S0", TrialPosition::new(0, 5)).unwrap_err();
        assert!(matches!(err, Error::UnknownElement { element: "trial", .. }));
        let err = resolve_at(&xp, "S9", TrialPosition::new(0, 0)).unwrap_err();
        assert!(matches!(err, Error::UnknownElement { element: "run", .. }));
    }
}
