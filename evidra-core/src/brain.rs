//! Brain module: LLM provider abstraction and the text-generation primitive.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, the `Brain`
//! wrapper that every control-plane component calls through, and the isolated
//! JSON extraction step used to read structured LLM output.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, GenerationConfig, Message, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize {
        128_000
    }
}

/// Token counter using tiktoken-rs for BPE tokenization.
///
/// Falls back to a ~4 chars/token estimate when no encoding can be loaded.
pub struct TokenCounter {
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl TokenCounter {
    /// Create a token counter for the given model.
    /// Falls back to cl100k_base if the model isn't recognized.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok();
        Self { bpe }
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    /// Estimate the token count for a set of messages.
    /// Adds overhead for message structure (role, separators).
    pub fn count_messages(&self, messages: &[Message]) -> usize {
        let mut total = 0;
        for msg in messages {
            total += 4;
            total += self.count(&msg.content);
        }
        total + 3
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::for_model("gpt-4o")
    }
}

/// The Brain wraps an LLM provider and exposes `generate`: given a prompt, an
/// optional system prompt and sampling config, return text.
///
/// Transient failures are retried with exponential backoff; usage is
/// accumulated across calls. A single `Arc<Brain>` is shared by all components
/// of an engine instance.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    token_counter: TokenCounter,
    max_retries: usize,
    total_usage: Mutex<TokenUsage>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let token_counter = TokenCounter::for_model(provider.model_name());
        Self {
            provider,
            token_counter,
            max_retries: 0,
            total_usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Set the number of retries for transient errors.
    pub fn with_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Generate text for a single prompt.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        config: GenerationConfig,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let token_estimate = self.token_counter.count_messages(&messages);
        let context_limit = self.provider.context_window();
        if token_estimate > context_limit {
            return Err(LlmError::ContextOverflow {
                used: token_estimate,
                limit: context_limit,
            });
        }

        debug!(
            model = self.provider.model_name(),
            estimated_tokens = token_estimate,
            temperature = config.temperature,
            "Sending completion request"
        );

        let request = CompletionRequest {
            messages,
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            model: None,
        };

        let response = self.complete_with_retry(request).await?;
        self.track_usage(&response.usage);
        Ok(response.message.content)
    }

    /// Send a completion request with retry logic and exponential backoff.
    ///
    /// Retries on transient errors (RateLimited, Timeout, Connection) up to
    /// `max_retries` times with exponential backoff (1s, 2s, 4s, ..., capped at 32s).
    /// Non-transient errors are returned immediately.
    async fn complete_with_retry(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if Self::is_retryable(&e) && attempt < self.max_retries => {
                    let backoff_secs = std::cmp::min(1u64 << attempt, 32);
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_secs } => {
                            std::cmp::max(*retry_after_secs, backoff_secs)
                        }
                        _ => backoff_secs,
                    };
                    info!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_secs = wait,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Check if an LLM error is transient and should be retried.
    pub fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }

    fn track_usage(&self, usage: &TokenUsage) {
        if let Ok(mut total) = self.total_usage.lock() {
            total.accumulate(usage);
        }
    }

    /// Total token usage across all calls made through this brain.
    pub fn total_usage(&self) -> TokenUsage {
        self.total_usage
            .lock()
            .map(|usage| *usage)
            .unwrap_or_default()
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Get the token counter used for prompt estimates.
    pub fn token_counter(&self) -> &TokenCounter {
        &self.token_counter
    }
}

/// Extract the outermost JSON object from an LLM response.
///
/// LLMs often wrap JSON in markdown fences or add prose around it; this takes
/// the span from the first `{` to the last `}`. Slicing at those byte offsets is
/// safe because both are single-byte ASCII.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

/// Parse a structured LLM response, returning `None` if no valid JSON is found.
///
/// Callers pair this with their own fallback value so that malformed output
/// never propagates as an error.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Option<T> {
    let json_str = extract_json_object(response)?;
    serde_json::from_str(json_str).ok()
}

/// A mock LLM provider for testing and development.
///
/// Responses (or errors) are returned in the order they were queued; every
/// request is recorded so tests can assert on call counts and prompt content.
pub struct MockLlmProvider {
    model: String,
    context_window: usize,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: 128_000,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that answers the first calls with the given texts, in order.
    pub fn with_responses<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for text in texts {
            provider.queue_text(text.as_ref());
        }
        provider
    }

    /// Queue a text response to be returned by the next `complete` call.
    pub fn queue_text(&self, text: &str) {
        self.queue(Ok(Self::text_response(text)));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.queue(Err(error));
    }

    fn queue(&self, item: Result<CompletionResponse, LlmError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(item);
        }
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// The user prompt of the most recent request.
    pub fn last_prompt(&self) -> Option<String> {
        self.requests().last().and_then(|r| {
            r.messages
                .iter()
                .rev()
                .find(|m| m.role == crate::types::Role::User)
                .map(|m| m.content.clone())
        })
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self.responses.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(item) => item,
            None => Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[tokio::test]
    async fn test_mock_provider_default_response() {
        let provider = MockLlmProvider::new();
        let response = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert!(response.message.content.contains("mock"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_provider_queued_responses_in_order() {
        let provider = MockLlmProvider::with_responses(["first", "second"]);
        let r1 = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        let r2 = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap();
        assert_eq!(r1.message.content, "first");
        assert_eq!(r2.message.content, "second");
    }

    #[tokio::test]
    async fn test_mock_provider_queued_error() {
        let provider = MockLlmProvider::new();
        provider.queue_error(LlmError::ApiRequest {
            message: "boom".into(),
        });
        let result = provider.complete(CompletionRequest::default()).await;
        assert!(matches!(result, Err(LlmError::ApiRequest { .. })));
    }

    #[tokio::test]
    async fn test_brain_generate_builds_system_and_user_messages() {
        let provider = Arc::new(MockLlmProvider::with_responses(["Tamam."]));
        let brain = Brain::new(provider.clone());

        let text = brain
            .generate(
                "Metformin nedir?",
                Some("You are a careful medical assistant."),
                GenerationConfig::new(0.2, 256),
            )
            .await
            .unwrap();
        assert_eq!(text, "Tamam.");

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, crate::types::Role::System);
        assert_eq!(request.messages[1].content, "Metformin nedir?");
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(brain.total_usage().total(), 150);
    }

    #[tokio::test]
    async fn test_brain_non_retryable_error_returned_immediately() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "mock".into(),
        });
        let brain = Brain::new(provider.clone()).with_retries(3);
        let result = brain
            .generate("hi", None, GenerationConfig::default())
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_is_retryable() {
        assert!(Brain::is_retryable(&LlmError::RateLimited {
            retry_after_secs: 1
        }));
        assert!(Brain::is_retryable(&LlmError::Timeout { timeout_secs: 30 }));
        assert!(!Brain::is_retryable(&LlmError::ResponseParse {
            message: "bad".into()
        }));
    }

    #[test]
    fn test_token_counter_counts_something() {
        let counter = TokenCounter::default();
        assert!(counter.count("Metformin yan etkileri nelerdir?") > 0);
        assert_eq!(counter.count(""), 0);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        tier: u8,
    }

    #[test]
    fn test_parse_json_response_plain() {
        let parsed: Option<Sample> = parse_json_response(r#"{"tier": 2}"#);
        assert_eq!(parsed, Some(Sample { tier: 2 }));
    }

    #[test]
    fn test_parse_json_response_wrapped_in_markdown() {
        let response = "Here you go:\n```json\n{\"tier\": 1}\n```";
        let parsed: Option<Sample> = parse_json_response(response);
        assert_eq!(parsed, Some(Sample { tier: 1 }));
    }

    #[test]
    fn test_parse_json_response_invalid() {
        assert!(parse_json_response::<Sample>("not json at all").is_none());
        assert!(parse_json_response::<Sample>("").is_none());
        assert!(parse_json_response::<Sample>("} backwards {").is_none());
        assert!(parse_json_response::<Sample>("{invalid}").is_none());
    }
}
