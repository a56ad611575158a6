//! Error types for pipeline processing.

use thiserror::Error;

/// Errors raised while running pipeline steps.
///
/// An error from an *input* step aborts the whole request. Output-step errors
/// never surface here during streaming; the engine contains them and passes
/// the chunk through unmodified.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step failed while processing a request.
    #[error("Pipeline step '{step}' failed: {message}")]
    Step {
        /// Name of the failing step.
        step: String,
        /// Description of the failure.
        message: String,
    },

    /// The secrets engine rejected an operation.
    #[error("Secrets engine error: {0}")]
    Secrets(#[from] crate::secrets::SecretsError),

    /// A request body could not be parsed as JSON.
    #[error("Malformed request body: {0}")]
    BodyParse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display() {
        let err = PipelineError::Step {
            step: "secrets-redaction".to_string(),
            message: "session expired".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("secrets-redaction"));
        assert!(msg.contains("session expired"));
    }
}
