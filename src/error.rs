//! Error types for the portfolio intelligence orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Upstream data unavailable: {0}")]
    UpstreamDataUnavailable(String),

    #[error("Inference failure: {0}")]
    InferenceFailure(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Workflow state violation: {0}")]
    StateViolation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Pattern error: {0}")]
    PatternError(#[from] regex::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Failures a node can absorb by degrading its output instead of aborting
    /// the request.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::UpstreamDataUnavailable(_)
                | OrchestrationError::InferenceFailure(_)
                | OrchestrationError::HttpError(_)
        )
    }

    /// Worth another attempt under the retry policy
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestrationError::HttpError(e) => {
                e.is_timeout() || e.is_connect() || e.status().map_or(true, |s| s.is_server_error())
            }
            OrchestrationError::UpstreamDataUnavailable(_)
            | OrchestrationError::InferenceFailure(_) => true,
            _ => false,
        }
    }
}
