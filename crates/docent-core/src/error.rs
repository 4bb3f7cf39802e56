//! Docent error types.

use thiserror::Error;

/// Every failure the pipeline and its adapters can report.
#[derive(Debug, Error)]
pub enum DocentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider timed out: {0}")]
    ProviderTimeout(String),

    #[error("Generation interrupted: {0}")]
    GenerationInterrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DocentError {
    /// Errors that must stop the process at startup or on first use.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ApiKeyMissing(_)
                | Self::ProviderNotFound(_)
                | Self::DimensionMismatch { .. }
        )
    }

    /// HTTP-equivalent status for the request-handling layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::ProviderUnavailable(_) | Self::Http(_) => 502,
            Self::ProviderTimeout(_) => 504,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DocentError::InvalidInput("empty".into()).status_code(), 400);
        assert_eq!(DocentError::ProviderUnavailable("down".into()).status_code(), 502);
        assert_eq!(DocentError::ProviderTimeout("slow".into()).status_code(), 504);
        assert_eq!(DocentError::Config("bad".into()).status_code(), 500);
    }

    #[test]
    fn test_configuration_class() {
        assert!(DocentError::DimensionMismatch { expected: 3, actual: 4 }.is_configuration());
        assert!(DocentError::ApiKeyMissing("openai".into()).is_configuration());
        assert!(!DocentError::IndexUnavailable("refused".into()).is_configuration());
    }
}
