//! Error type shared by every stage of the analysis.

use ndarray_npy::{ReadNpyError, WriteNpyError};
use thiserror::Error;

/// Enum for errors in this crate
#[derive(Error, Debug)]
pub enum ImetadError {
    /// Error returned when a builder's `build()` was called improperly
    #[error("Could not build configuration: {0}")]
    BuilderError(String),

    /// The trajectory never reached the product window, or no reactant-side sample precedes it
    #[error("No barrier crossing found: {stage}")]
    MissingCrossing {
        /// Which search failed
        stage: CrossingStage,
    },

    /// The crossing was found at an index with no sample (or no reweighting interval) before it
    #[error("Crossing at index {index} leaves no sample before the barrier")]
    DegenerateIndex {
        #[allow(missing_docs)]
        index: usize,
    },

    /// The reweighting integral overflowed or produced a non-positive time
    #[error("Rescaled transition time {0} is not a finite positive number")]
    NonFiniteTime(f64),

    /// Non-linear least squares did not converge on tau
    #[error("Curve fit did not converge after {iterations} iterations (tau = {last_tau})")]
    FitConvergence {
        #[allow(missing_docs)]
        iterations: usize,
        /// Last accepted iterate, reported for diagnosis only
        last_tau: f64,
    },

    /// Too few transition times to build an empirical CDF
    #[error("At least {required} transition times are needed, got {found}")]
    InsufficientSamples {
        #[allow(missing_docs)]
        required: usize,
        #[allow(missing_docs)]
        found: usize,
    },

    /// A transition time violates the ensemble invariant (finite and strictly positive)
    #[error("Transition time {value} at position {index} is not finite and positive")]
    InvalidEnsemble {
        #[allow(missing_docs)]
        index: usize,
        #[allow(missing_docs)]
        value: f64,
    },

    /// Error returned when an array is the wrong length
    #[error("Array of length {0} is incorrect; length should be {1}")]
    ArrayLengthMismatch(usize, usize),

    /// Malformed trajectory data
    #[error("Malformed input at line {line}: {message}")]
    Format {
        /// 1-based line number in the source text, or 0 if the problem is not line-specific
        line: usize,
        #[allow(missing_docs)]
        message: String,
    },

    /// Extraction failed for a specific run
    #[error("Run {run} failed: {source}")]
    Run {
        #[allow(missing_docs)]
        run: usize,
        #[allow(missing_docs)]
        source: Box<ImetadError>,
    },

    #[allow(missing_docs)]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[allow(missing_docs)]
    #[error("Could not read array file: {0}")]
    NpyRead(#[from] ReadNpyError),

    #[allow(missing_docs)]
    #[error("Could not write array file: {0}")]
    NpyWrite(#[from] WriteNpyError),

    #[allow(missing_docs)]
    #[error("Invalid configuration file: {0}")]
    Config(#[from] toml::de::Error),

    #[allow(missing_docs)]
    #[error("Could not serialise report: {0}")]
    Json(#[from] serde_json::Error),
}

/// The two searches that locate a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingStage {
    /// No sample ever enters the product window
    ProductState,
    /// No sample before the product state lies outside the barrier window
    Barrier,
}

impl std::fmt::Display for CrossingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProductState => write!(f, "trajectory never enters the product window"),
            Self::Barrier => write!(f, "no reactant-side sample precedes the product state"),
        }
    }
}

impl ImetadError {
    /// Attach a run number to a per-run failure
    pub fn in_run(self, run: usize) -> Self {
        Self::Run {
            run,
            source: Box::new(self),
        }
    }

    /// Shorthand for a `Format` error
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            line,
            message: message.into(),
        }
    }
}

impl From<String> for ImetadError {
    fn from(s: String) -> Self {
        Self::BuilderError(s)
    }
}

/// Result type for the imetad-rs crate
pub type Result<T> = std::result::Result<T, ImetadError>;
