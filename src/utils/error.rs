//! Error handling for the logging pipeline
//!
//! This module defines all error types used throughout the pipeline.

use thiserror::Error;

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
///
/// Fallible operations return this through [`Result`] instead of panicking;
/// nothing in the public surface throws past the crate boundary.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors (unknown stream, request, or transfer id)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (duplicate stream name)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stream destination errors
    #[error("Stream error: {0}")]
    Stream(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Whether this error indicates a missing entity rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::config("missing level");
        assert_eq!(err.to_string(), "Configuration error: missing level");

        let err = PipelineError::not_found("stream 'x'");
        assert_eq!(err.to_string(), "Not found: stream 'x'");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
