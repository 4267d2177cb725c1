//! LLM and evidence provider implementations.
//!
//! Provides the `EvidenceProvider` trait consumed by the round fetcher along
//! with concrete implementations:
//! - `OpenAiCompatibleProvider` for the LLM text-generation primitive
//! - `HttpEvidenceProvider` for an HTTP evidence gateway, one per provider kind
//! - `MockEvidenceProvider` for tests and offline runs
//!
//! Use `create_llm_provider()` and `create_evidence_providers()` to build
//! them from configuration.

pub mod http;
pub mod mock;
pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::{LlmConfig, ProvidersConfig};
use crate::error::{LlmError, ProviderError};
use crate::research::sources::{EvidenceRecord, ProviderKind};
use async_trait::async_trait;
use std::sync::Arc;

pub use http::HttpEvidenceProvider;
pub use mock::MockEvidenceProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// One external evidence source: given a query and a count, return records or fail.
///
/// Implementations must only return records whose shape matches `kind()`.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// Which provider this adapter fronts.
    fn kind(&self) -> ProviderKind;

    /// Fetch up to `count` records for `query`.
    async fn fetch(&self, query: &str, count: usize) -> Result<Vec<EvidenceRecord>, ProviderError>;
}

/// Create the LLM provider named by `config.provider`.
///
/// `"mock"` yields a `MockLlmProvider` with no queued responses; every other
/// name is served by the OpenAI-compatible client.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        "openai" | "openrouter" | "local" | "ollama" | "vllm" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => Err(LlmError::ApiRequest {
            message: format!("Unsupported LLM provider: {other}"),
        }),
    }
}

/// Create one HTTP evidence provider per configured endpoint.
///
/// Providers without an endpoint are left out; the fetcher reports them as
/// failed for every round.
pub fn create_evidence_providers(
    config: &ProvidersConfig,
    timeout_ms: u64,
) -> Result<Vec<Arc<dyn EvidenceProvider>>, ProviderError> {
    let entries = [
        (ProviderKind::Web, &config.web),
        (ProviderKind::Journal, &config.journal),
        (ProviderKind::Preprint, &config.preprint),
        (ProviderKind::Trials, &config.trials),
    ];

    let mut providers: Vec<Arc<dyn EvidenceProvider>> = Vec::new();
    for (kind, endpoint) in entries {
        match endpoint {
            Some(endpoint) => {
                providers.push(Arc::new(HttpEvidenceProvider::new(kind, endpoint, timeout_ms)?));
            }
            None => tracing::warn!(provider = %kind, "No endpoint configured; provider disabled"),
        }
    }
    Ok(providers)
}
