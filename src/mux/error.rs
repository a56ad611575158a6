//! Error types for muxing rules and routing.

use thiserror::Error;

/// Errors from rule management and route resolution.
///
/// "No matching rule" is *not* an error: resolution returns an explicit
/// no-route value. Errors here are genuine faults: bad patterns, unknown
/// workspaces, or rules pointing at providers/models that no longer exist.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A rule pattern is not a valid glob.
    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob {
        /// The offending pattern.
        pattern: String,
        /// Description of the parse failure.
        message: String,
    },

    /// The named workspace does not exist.
    #[error("Unknown workspace '{0}'")]
    UnknownWorkspace(String),

    /// A matched rule references a provider or model that was deleted.
    #[error("Rule destination references missing provider '{provider}' (model '{model}')")]
    DanglingRoute {
        /// Provider name the rule points at.
        provider: String,
        /// Model name the rule points at.
        model: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_route_display() {
        let err = MuxError::DanglingRoute {
            provider: "openai-main".to_string(),
            model: "gpt-4o".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("openai-main"));
        assert!(msg.contains("gpt-4o"));
    }
}
