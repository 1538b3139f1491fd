//! Error types for lightmill-core
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Every failure carries a machine-readable [`ErrorKind`] (what adapters put
//! in the `type` field of their responses) and a human-readable message
//! (the `Display` output).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::experiment::MeasureLevel;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// lightmill-core error types
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced experiment, run, block or trial does not exist
    #[error("Unknown {element}: {id}")]
    UnknownElement {
        /// Kind of element ("experiment", "run", "block", "trial", "measure")
        element: &'static str,
        /// Identifier that failed to resolve
        id: String,
    },

    /// Lock requested on a run that already holds a token
    #[error("Run {run} of {experiment} is already locked.")]
    RunAlreadyLocked {
        /// Experiment id
        experiment: String,
        /// Run id
        run: String,
    },

    /// Unlock or write attempted on a run without a token
    #[error("Run {run} of {experiment} is not locked. Run must be locked before writing.")]
    RunNotLocked {
        /// Experiment id
        experiment: String,
        /// Run id
        run: String,
    },

    /// Supplied token does not match the run's token
    #[error("Wrong token: {token} for run {run}")]
    WrongToken {
        /// Run id
        run: String,
        /// Token that was presented
        token: String,
    },

    /// Out-of-sequence or duplicate trial completion
    #[error("{0}\nRe-fetch the current trial and retry.")]
    ExperimentProgress(String),

    /// Unknown or level-mismatched measure key in a submission
    #[error("{0}")]
    WrongMeasureKey(String),

    /// A measure value was built against a measure lacking that level
    #[error("Measure {measure} is not recordable at the {level} level")]
    MeasureLevel {
        /// Measure id
        measure: String,
        /// Requested level
        level: MeasureLevel,
    },

    /// An experiment with the same id is already imported
    #[error("Experiment already exists: {0}")]
    DuplicateExperiment(String),

    /// Experiment design violates a structural invariant
    #[error("Invalid experiment design: {0}")]
    InvalidDesign(String),

    /// A measure level string other than `trial` or `event`
    #[error("Unsupported measure level: {0}")]
    InvalidMeasureLevel(String),

    /// Completion notifier could not start a dispatch task
    #[error("Completion notifier unavailable: {0}")]
    NotifierUnavailable(String),

    /// Snapshot (de)serialization failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`Error::UnknownElement`]
    UnknownElement,
    /// See [`Error::RunAlreadyLocked`]
    RunAlreadyLocked,
    /// See [`Error::RunNotLocked`]
    RunNotLocked,
    /// See [`Error::WrongToken`]
    WrongToken,
    /// See [`Error::ExperimentProgress`]
    ExperimentProgressError,
    /// See [`Error::WrongMeasureKey`]
    WrongMeasureKey,
    /// See [`Error::MeasureLevel`]
    MeasureLevelError,
    /// See [`Error::DuplicateExperiment`]
    CannotImportExperiment,
    /// See [`Error::InvalidDesign`]
    InvalidDesign,
    /// Contract violations and infrastructure failures
    Internal,
}

impl ErrorKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownElement => "UnknownElement",
            Self::RunAlreadyLocked => "RunAlreadyLocked",
            Self::RunNotLocked => "RunNotLocked",
            Self::WrongToken => "WrongToken",
            Self::ExperimentProgressError => "ExperimentProgressError",
            Self::WrongMeasureKey => "WrongMeasureKey",
            Self::MeasureLevelError => "MeasureLevelError",
            Self::CannotImportExperiment => "CannotImportExperiment",
            Self::InvalidDesign => "InvalidDesign",
            Self::Internal => "Internal",
        }
    }

    /// Whether the caller can recover by fixing its request.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        !matches!(self, Self::Internal | Self::MeasureLevelError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Machine-readable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownElement { .. } => ErrorKind::UnknownElement,
            Self::RunAlreadyLocked { .. } => ErrorKind::RunAlreadyLocked,
            Self::RunNotLocked { .. } => ErrorKind::RunNotLocked,
            Self::WrongToken { .. } => ErrorKind::WrongToken,
            Self::ExperimentProgress(_) => ErrorKind::ExperimentProgressError,
            Self::WrongMeasureKey(_) => ErrorKind::WrongMeasureKey,
            Self::MeasureLevel { .. } => ErrorKind::MeasureLevelError,
            Self::DuplicateExperiment(_) => ErrorKind::CannotImportExperiment,
            Self::InvalidDesign(_) => ErrorKind::InvalidDesign,
            Self::InvalidMeasureLevel(_)
            | Self::NotifierUnavailable(_)
            | Self::Snapshot(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unknown(element: &'static str, id: impl Into<String>) -> Self {
        Self::UnknownElement {
            element,
            id: id.into(),
        }
    }
}
