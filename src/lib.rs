//! # lightmill-core: Experiment Progress Engine
//!
//! **Version**: 0.3 (core progress model)
//!
//! lightmill-core runs controlled experiments (HCI / psychology style): an
//! experiment declares factors (independent variables) and measures
//! (dependent variables) and is decomposed into runs, blocks and trials that
//! participants execute strictly in sequence.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: trials complete only in design order, once
//! - **Jidoka**: every write checks token, sequence and measure keys first,
//!   then commits in one critical section
//! - **Heijunka**: slow result listeners never delay trial completion
//!
//! ## Components
//!
//! | Module          | Role                                              |
//! |-----------------|---------------------------------------------------|
//! | [`experiment`]  | Entity tree: Experiment → Run → Block → Trial     |
//! | [`resolve`]     | Factor values: trial → block → default            |
//! | [`registry`]    | Measure key validation and auto-registration      |
//! | [`progress`]    | Current / next / previous trial, block numbering  |
//! | [`completion`]  | `Pending → Completed` with the sequence check     |
//! | [`lock`]        | Token-based run locking                           |
//! | [`notify`]      | Completed-trial fan-out to listeners              |
//! | [`store`]       | Concurrent experiment store with JSON snapshots   |
//! | [`service`]     | The operations adapters call                      |
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lightmill_core::{Config, ProgressService, TrialSubmission};
//! use lightmill_core::store::ExperimentStore;
//! use std::sync::Arc;
//!
//! # fn main() -> lightmill_core::Result<()> {
//! let store = Arc::new(ExperimentStore::load("progress.json")?);
//! let service = ProgressService::builder()
//!     .config(Config::from_env())
//!     .store(store)
//!     .build();
//!
//! if let Some(run) = service.available_run("E1")? {
//!     let token = service.lock_run("E1", &run.id)?;
//!     while let Some(trial) = service.current_trial("E1", &run.id)? {
//!         let submission = TrialSubmission::new(&token);
//!         service.submit_trial_result("E1", &run.id, trial.block_number, trial.number, submission)?;
//!     }
//!     service.unlock_run("E1", &run.id, &token)?;
//! }
//! service.store().save("progress.json")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod completion;
pub mod config;
pub mod error;
pub mod experiment;
pub mod lock;
pub mod notify;
pub mod payload;
pub mod progress;
pub mod registry;
pub mod resolve;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod views;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use notify::{CompletionListener, SubscriptionId};
pub use payload::{MeasureInput, TrialSubmission};
pub use service::{ProgressService, ProgressServiceBuilder};
pub use views::{BlockInfo, BlockPlan, MeasureCatalog, RunInfo, TrialInfo, TrialPlan};
