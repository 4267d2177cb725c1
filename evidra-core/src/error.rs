//! Error types for the Evidra research core.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! the LLM, evidence provider, research pipeline, and configuration domains.

use std::path::PathBuf;

use crate::research::sources::ProviderKind;

/// Top-level error type for the Evidra core library.
#[derive(Debug, thiserror::Error)]
pub enum EvidraError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Context window exceeded: used {used} of {limit} tokens")]
    ContextOverflow { used: usize, limit: usize },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from a single evidence provider call.
///
/// These never abort a round; the fetcher records them as a failed provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Request {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout {
        provider: ProviderKind,
        timeout_ms: u64,
    },

    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: ProviderKind,
        message: String,
    },
}

/// Fatal errors of a research run.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Planning failed: {0}")]
    Planning(#[source] LlmError),

    #[error("Reflection failed in round {round}: {source}")]
    Reflection {
        round: usize,
        #[source]
        source: LlmError,
    },

    #[error("Query refinement failed for round {round}: {source}")]
    Refinement {
        round: usize,
        #[source]
        source: LlmError,
    },

    #[error("Relevance ranking failed: {0}")]
    Ranking(#[source] LlmError),

    #[error("Recall answer generation failed: {0}")]
    Recall(#[source] LlmError),

    #[error("Research run was cancelled after {completed_rounds} round(s)")]
    Cancelled { completed_rounds: usize },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `EvidraError`.
pub type Result<T> = std::result::Result<T, EvidraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = EvidraError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_provider_timeout() {
        let err = ProviderError::Timeout {
            provider: ProviderKind::Trials,
            timeout_ms: 8000,
        };
        assert_eq!(err.to_string(), "clinical_trials timed out after 8000ms");
    }

    #[test]
    fn test_research_error_keeps_round() {
        let err = ResearchError::Reflection {
            round: 2,
            source: LlmError::Timeout { timeout_secs: 30 },
        };
        assert_eq!(
            err.to_string(),
            "Reflection failed in round 2: Request timed out after 30s"
        );
    }

    #[test]
    fn test_error_from_conversions() {
        let llm_err = LlmError::RateLimited {
            retry_after_secs: 5,
        };
        let err: EvidraError = llm_err.into();
        assert!(matches!(err, EvidraError::Llm(_)));

        let research_err = ResearchError::Cancelled {
            completed_rounds: 1,
        };
        let err: EvidraError = research_err.into();
        assert!(matches!(err, EvidraError::Research(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::EnvVarMissing {
            var: "OPENAI_API_KEY".into(),
        };
        assert_eq!(err.to_string(), "Environment variable not set: OPENAI_API_KEY");
    }
}
