use core::fmt;

use crate::report::Trace;

/// Invalid inputs, rejected before any work is done.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A dimension (data count, cell count, iteration budget, ...) is zero.
    EmptyDimension { what: &'static str },
    /// A vector does not have the length the kernel requires.
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// An uncertainty entry is zero or negative.
    NonPositiveUncertainty { index: usize, value: f64 },
    /// A value that must be finite is NaN or infinite.
    NonFinite { what: &'static str, index: usize },
    /// A scalar parameter is outside its admissible range.
    OutOfRange {
        what: &'static str,
        value: f64,
        requirement: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDimension { what } => write!(f, "{what} must be at least 1"),
            Self::LengthMismatch {
                what,
                expected,
                actual,
            } => {
                write!(f, "{what} has length {actual}, expected {expected}")
            }
            Self::NonPositiveUncertainty { index, value } => {
                write!(f, "uncertainty at index {index} is {value}, must be > 0")
            }
            Self::NonFinite { what, index } => {
                write!(f, "{what} at index {index} is not finite")
            }
            Self::OutOfRange {
                what,
                value,
                requirement,
            } => {
                write!(f, "{what} = {value} violates {requirement}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors while setting up or running an inversion.
#[derive(Debug)]
pub enum InversionError {
    /// Inputs were rejected before the first iteration.
    InvalidConfiguration(ConfigError),
    /// The objective or the solved step stopped being finite.
    ///
    /// `trace` holds every iteration completed before `iteration`.
    NumericalFailure { iteration: usize, trace: Box<Trace> },
    /// faer reported an error during symbolic factorization.
    Factorization(faer_sparse::FaerError),
    /// Workspace requirement overflowed.
    WorkspaceOverflow,
    /// Workspace allocation failed.
    WorkspaceAlloc,
}

impl fmt::Display for InversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(err) => write!(f, "invalid configuration: {err}"),
            Self::NumericalFailure { iteration, trace } => write!(
                f,
                "numerical failure at iteration {iteration} ({} iterations completed)",
                trace.iterations()
            ),
            Self::Factorization(err) => write!(f, "faer error: {err:?}"),
            Self::WorkspaceOverflow => write!(f, "workspace size overflow"),
            Self::WorkspaceAlloc => write!(f, "workspace allocation failed"),
        }
    }
}

impl std::error::Error for InversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfiguration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for InversionError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfiguration(err)
    }
}

pub(crate) fn require_finite(what: &'static str, values: &[f64]) -> Result<(), ConfigError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ConfigError::NonFinite { what, index }),
        None => Ok(()),
    }
}

pub(crate) fn require_range(
    what: &'static str,
    value: f64,
    requirement: &'static str,
    ok: bool,
) -> Result<(), ConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            what,
            value,
            requirement,
        })
    }
}
