use thiserror::Error;

/// Infrastructure failures of the playground.
///
/// Errors raised by guest code are not represented here: they are values
/// carried in `ExecutionResult::error`.
#[derive(Error, Debug)]
pub enum PlayletError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Sandbox errors
    #[error("{language} is not available: {reason}")]
    EnvironmentUnavailable { language: String, reason: String },

    #[error("Sandbox creation failed: {0}")]
    SandboxCreation(String),

    #[error("Execution timed out after {millis} ms")]
    Timeout { millis: u64, logs: Vec<String> },

    #[error("Execution was superseded by a newer request")]
    Cancelled,

    #[error("Source is {size} bytes, above the {limit} byte limit")]
    CodeTooLarge { size: usize, limit: usize },

    // Display errors
    #[error("Output surface unavailable: {0}")]
    SurfaceUnavailable(String),

    // Handoff errors
    #[error("Nothing waiting in handoff slot '{slot}'")]
    HandoffEmpty { slot: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlayletError {
    /// True when the isolation machinery failed rather than the guest code.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentUnavailable { .. } | Self::SandboxCreation(_) | Self::Timeout { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PlayletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unavailable = PlayletError::EnvironmentUnavailable {
            language: "python".to_string(),
            reason: "python3 not found".to_string(),
        };
        assert!(unavailable.is_infrastructure());
        assert!(!unavailable.is_retryable());
        assert_eq!(unavailable.to_string(), "python is not available: python3 not found");

        let timeout = PlayletError::Timeout {
            millis: 500,
            logs: vec![],
        };
        assert!(timeout.is_infrastructure());
        assert!(timeout.is_retryable());

        assert!(!PlayletError::Cancelled.is_infrastructure());
    }
}
