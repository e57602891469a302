//! Error types for the beat tracking engine

use std::fmt;

use safetensors::SafeTensorError;

/// Errors that can occur while building or loading a tracking pipeline
///
/// Per-frame processing never fails: numerical anomalies are repaired in place
/// and only construction-time problems surface as errors.
#[derive(Debug, Clone)]
pub enum TrackerError {
    /// Invalid input parameters
    InvalidInput(String),

    /// Configuration rejected by [`crate::TrackerConfig::validate`]
    InvalidConfig(String),

    /// Parameter bundle missing tensors or carrying the wrong shapes
    ModelError(String),

    /// I/O error while reading a parameter bundle
    Io(String),

    /// Non-finite values (NaN, infinity) in a parameter bundle
    NumericalError(String),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            TrackerError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            TrackerError::ModelError(msg) => write!(f, "Model error: {}", msg),
            TrackerError::Io(msg) => write!(f, "I/O error: {}", msg),
            TrackerError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Io(err.to_string())
    }
}

impl From<SafeTensorError> for TrackerError {
    fn from(err: SafeTensorError) -> Self {
        TrackerError::ModelError(format!("safetensors: {}", err))
    }
}
