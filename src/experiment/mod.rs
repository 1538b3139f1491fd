//! Experiment design schema
//!
//! This module provides the entity hierarchy of an experiment. Ownership is
//! strictly hierarchical: a child belongs to exactly one parent and goes away
//! with it.
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Factor (N) ──< FactorValue (N)
//!        │
//!        ├──< Measure (N) [trial and/or event level]
//!        └──< Run (N) ──< Block (N) ──< Trial (N) ──< Event (N)
//! ```
//!
//! The skeleton is built once by an importer. Afterwards only run tokens,
//! trial completions and measure definitions change.
//!
//! ## Usage
//!
//! ```rust
//! use lightmill_core::experiment::{Block, Experiment, Factor, Measure, Run, Trial};
//!
//! # fn main() -> lightmill_core::Result<()> {
//! let size = Factor::builder("size", "String")
//!     .value("small")
//!     .value("big")
//!     .default_value("small")
//!     .build()?;
//!
//! let block = Block::new(0)
//!     .with_factor_value("size", "big")
//!     .with_trial(Trial::new(0))?;
//!
//! let experiment = Experiment::builder("E1", "Pointing")
//!     .factor(size)
//!     .measure(Measure::new("time", "Integer", true, false)?)
//!     .run(Run::new("S0").with_block(block)?)
//!     .build()?;
//!
//! assert_eq!(experiment.run_count(), 1);
//! # Ok(())
//! # }
//! ```

#[allow(clippy::module_inception)]
mod experiment;
mod factor;
mod measure;
mod run;

pub use experiment::{Experiment, ExperimentBuilder};
pub use factor::{Factor, FactorBuilder, FactorValue};
pub use measure::{
    EventMeasureValue, Measure, MeasureBuilder, MeasureLevel, MeasureUpdate, Scalar,
    TrialMeasureValue, UNREGISTERED_TYPE,
};
pub use run::{Block, Event, Run, Trial, TrialPosition, TrialState};
