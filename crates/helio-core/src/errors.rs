//! Error types for heliograph.
//!
//! Configuration-time errors abort a run before anything is computed.
//! Physical evaluation errors are recoverable by the inversion engine and
//! never escape a pixel batch.

use thiserror::Error;

/// Unified error type for all heliograph operations.
#[derive(Error, Debug)]
pub enum HelioError {
    /// Unresolved topology reference, inconsistent filling factors,
    /// wavelength-grid or array-shape mismatch, invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Parameter vector length does not match the component kind's arity.
    #[error("Parameter shape error for '{component}' ({kind}): expected {expected} values, got {got}")]
    ParameterShape {
        component: String,
        kind: String,
        expected: usize,
        got: usize,
    },

    /// The numerical kernel cannot produce a physical result for the given parameters.
    #[error("Physical evaluation failed in '{component}': {message}")]
    PhysicalEvaluation { component: String, message: String },

    /// I/O errors (observation files, result archives, telemetry)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed text input
    #[error("Parse error in {path} line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    /// Structured array archive errors
    #[error("Array archive error: {0}")]
    Npz(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors (fallback)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HelioError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        HelioError::Configuration(message.into())
    }

    /// Creates a parameter shape error.
    pub fn shape(
        component: impl Into<String>,
        kind: impl Into<String>,
        expected: usize,
        got: usize,
    ) -> Self {
        HelioError::ParameterShape {
            component: component.into(),
            kind: kind.into(),
            expected,
            got,
        }
    }

    /// Creates a physical evaluation error tagged with the component name.
    pub fn physical(component: impl Into<String>, message: impl Into<String>) -> Self {
        HelioError::PhysicalEvaluation {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        HelioError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Creates an array archive error.
    pub fn npz(message: impl Into<String>) -> Self {
        HelioError::Npz(message.into())
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        HelioError::Internal(message.into())
    }

    /// Checks if this is a retriable error.
    ///
    /// Only physical evaluation failures are worth retrying with perturbed
    /// parameters; everything else is deterministic.
    pub fn is_retriable(&self) -> bool {
        matches!(self, HelioError::PhysicalEvaluation { .. })
    }

    /// Checks if this error belongs to the configuration-time class.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HelioError::Configuration(_) | HelioError::ParameterShape { .. }
        )
    }

    /// Returns a user-friendly error message with actionable guidance.
    pub fn user_message(&self) -> String {
        match self {
            HelioError::Configuration(msg) => {
                format!(
                    "Configuration error: {}\n\
                     → Check region topologies, atmosphere names and filling factors.\n\
                     → Observation arrays must be [n_wvl, 4] on the region's wavelength grid.",
                    msg
                )
            }
            HelioError::ParameterShape {
                component,
                kind,
                expected,
                got,
            } => {
                format!(
                    "Component '{}' is a {} and takes exactly {} parameters (got {}).",
                    component, kind, expected, got
                )
            }
            HelioError::PhysicalEvaluation { component, message } => {
                format!(
                    "Component '{}' produced a non-physical result: {}\n\
                     → Narrow the parameter ranges or check the line-of-sight angles.",
                    component, message
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type alias for heliograph operations.
pub type Result<T> = std::result::Result<T, HelioError>;
