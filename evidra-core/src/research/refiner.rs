//! Query refiner: one LLM call rewriting the search query toward the gaps
//! identified by the reflector.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::brain::{Brain, parse_json_response};
use crate::error::ResearchError;
use crate::sanitize::{collapse_whitespace, escape_for_llm_prompt};
use crate::types::GenerationConfig;

const REFINER_SYSTEM_PROMPT: &str = "You write search queries for medical literature. \
Answer with a single JSON object and nothing else.";

/// Longest query accepted from the model, in characters.
const MAX_QUERY_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
struct RefinerOutput {
    #[serde(alias = "refined_query")]
    query: String,
}

pub struct QueryRefiner {
    brain: Arc<Brain>,
    temperature: f32,
}

impl QueryRefiner {
    pub fn new(brain: Arc<Brain>, temperature: f32) -> Self {
        Self { brain, temperature }
    }

    /// Produce the query for `next_round`.
    ///
    /// Accepts either `{"query": "..."}` or a bare line of text. An empty
    /// answer keeps the original question as the query. LLM failures are fatal.
    pub async fn refine(
        &self,
        question: &str,
        gaps: &[String],
        next_round: usize,
    ) -> Result<String, ResearchError> {
        let mut prompt = format!(
            "Original question: {}\nNext round: {next_round}\nGaps to target:\n",
            escape_for_llm_prompt(question, 2000)
        );
        for gap in gaps {
            prompt.push_str(&format!("- {}\n", escape_for_llm_prompt(gap, 300)));
        }
        prompt.push_str("\nRespond as JSON: {\"query\": \"...\"}");

        let response = self
            .brain
            .generate(
                &prompt,
                Some(REFINER_SYSTEM_PROMPT),
                GenerationConfig::new(self.temperature, 128),
            )
            .await
            .map_err(|source| ResearchError::Refinement {
                round: next_round,
                source,
            })?;

        let refined = match parse_json_response::<RefinerOutput>(&response) {
            Some(output) => output.query,
            None => response
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && !l.starts_with("```"))
                .unwrap_or_default()
                .trim_matches('"')
                .to_string(),
        };
        let refined: String = collapse_whitespace(&refined)
            .chars()
            .take(MAX_QUERY_CHARS)
            .collect();

        if refined.is_empty() {
            warn!(round = next_round, "Refiner returned an empty query; keeping the question");
            return Ok(question.to_string());
        }
        debug!(round = next_round, query = %refined, "Query refined");
        Ok(refined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;

    fn refiner(mock: Arc<MockLlmProvider>) -> QueryRefiner {
        QueryRefiner::new(Arc::new(Brain::new(mock)), 0.4)
    }

    #[tokio::test]
    async fn test_refine_json() {
        let mock = Arc::new(MockLlmProvider::with_responses([
            r#"{"query": "metformin  renal dosing eGFR"}"#,
        ]));
        let gaps = vec!["renal dosing".to_string()];
        let query = refiner(mock.clone()).refine("metformin", &gaps, 2).await.unwrap();
        assert_eq!(query, "metformin renal dosing eGFR");
        let prompt = mock.last_prompt().unwrap();
        assert!(prompt.contains("- renal dosing"));
        assert!(prompt.contains("Next round: 2"));
    }

    #[tokio::test]
    async fn test_refine_plain_text() {
        let mock = Arc::new(MockLlmProvider::with_responses(["\"metformin B12 deficiency\"\n"]));
        let query = refiner(mock).refine("metformin", &[], 2).await.unwrap();
        assert_eq!(query, "metformin B12 deficiency");
    }

    #[tokio::test]
    async fn test_empty_refinement_keeps_question() {
        let mock = Arc::new(MockLlmProvider::with_responses([r#"{"query": "  "}"#]));
        let query = refiner(mock).refine("metformin", &[], 3).await.unwrap();
        assert_eq!(query, "metformin");
    }

    #[tokio::test]
    async fn test_llm_failure_is_fatal() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_error(LlmError::ApiRequest {
            message: "500".into(),
        });
        let err = refiner(mock).refine("metformin", &[], 3).await.unwrap_err();
        assert!(matches!(err, ResearchError::Refinement { round: 3, .. }));
    }
}
