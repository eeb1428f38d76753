//! Domain error types
//!
//! This module defines the error hierarchy for Veil. The variants follow the
//! error taxonomy of the engine: configuration errors are fatal at load time,
//! invalid input values are governed by the processing error policy,
//! processing errors indicate a traversal bug and always abort, and I/O errors
//! are retried when classified retryable.

use thiserror::Error;

/// Main Veil error type
///
/// This is the primary error type used throughout the library.
#[derive(Debug, Error)]
pub enum VeilError {
    /// Missing or invalid rule, parameter or method
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A custom processor name collides with a built-in or registered name
    #[error("Processor name conflict: '{0}' is already registered")]
    ProcessorNameConflict(String),

    /// A node value could not be interpreted by a processor
    #[error("Invalid input value: {0}")]
    InvalidInput(String),

    /// A processor was applied to a node type it does not support
    #[error("Method '{method}' does not support node type '{node_type}'")]
    UnsupportedNodeType { method: String, node_type: String },

    /// Internal consistency violation during traversal
    #[error("Processing error: {0}")]
    Processing(String),

    /// I/O errors from readers and writers
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An operation did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The job was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A job aborted under the `raise` policy
    #[error("Job aborted at '{locator}': {source}")]
    JobAborted {
        locator: String,
        #[source]
        source: Box<VeilError>,
    },
}

impl VeilError {
    /// Whether the error is an invalid input value (policy controlled)
    pub fn is_invalid_input(&self) -> bool {
        match self {
            VeilError::InvalidInput(_) | VeilError::UnsupportedNodeType { .. } => true,
            VeilError::JobAborted { source, .. } => source.is_invalid_input(),
            _ => false,
        }
    }

    /// Whether the error must abort a job regardless of the failure policy
    pub fn is_fatal(&self) -> bool {
        match self {
            VeilError::Configuration(_)
            | VeilError::ProcessorNameConflict(_)
            | VeilError::Processing(_)
            | VeilError::Cancelled(_) => true,
            VeilError::JobAborted { .. } => true,
            _ => false,
        }
    }

    /// Whether an I/O-facing operation may be retried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, VeilError::Io(_) | VeilError::Timeout(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            VeilError::Configuration(_) | VeilError::ProcessorNameConflict(_) => 2,
            VeilError::InvalidInput(_) | VeilError::UnsupportedNodeType { .. } => 3,
            VeilError::Processing(_) => 4,
            VeilError::Io(_) | VeilError::Serialization(_) | VeilError::Timeout(_) => 5,
            VeilError::Cancelled(_) => 130,
            VeilError::JobAborted { source, .. } => source.exit_code(),
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for VeilError {
    fn from(err: std::io::Error) -> Self {
        VeilError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for VeilError {
    fn from(err: serde_json::Error) -> Self {
        VeilError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for VeilError {
    fn from(err: toml::de::Error) -> Self {
        VeilError::Configuration(format!("TOML parse error: {err}"))
    }
}
