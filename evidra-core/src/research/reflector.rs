//! Reflector: one LLM call after each non-final round assessing evidence
//! quality, listing gaps and recommending whether to continue.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::orchestrator::RoundResult;
use crate::brain::{Brain, parse_json_response};
use crate::error::ResearchError;
use crate::sanitize::escape_for_llm_prompt;
use crate::types::GenerationConfig;

const REFLECTOR_SYSTEM_PROMPT: &str = "You review gathered medical evidence for gaps. \
Answer with a single JSON object and nothing else.";

/// Titles of this round shown to the reflector, per call.
const MAX_TITLES_IN_PROMPT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceQuality {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for EvidenceQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceQuality::Low => write!(f, "low"),
            EvidenceQuality::Medium => write!(f, "medium"),
            EvidenceQuality::High => write!(f, "high"),
        }
    }
}

/// LLM assessment of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub evidence_quality: EvidenceQuality,
    pub gaps_identified: Vec<String>,
    pub should_continue: bool,
    pub reasoning: String,
}

impl Reflection {
    /// Reflection used when the model output cannot be parsed: stop with the evidence at hand.
    pub fn unparseable() -> Self {
        Self {
            evidence_quality: EvidenceQuality::Medium,
            gaps_identified: Vec::new(),
            should_continue: false,
            reasoning: "reflection output could not be parsed".to_string(),
        }
    }

    pub fn has_gaps(&self) -> bool {
        !self.gaps_identified.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ReflectorOutput {
    #[serde(alias = "evidenceQuality")]
    evidence_quality: EvidenceQuality,
    #[serde(default, alias = "gapsIdentified")]
    gaps_identified: Vec<String>,
    #[serde(alias = "shouldContinue")]
    should_continue: bool,
    #[serde(default)]
    reasoning: String,
}

pub struct Reflector {
    brain: Arc<Brain>,
    temperature: f32,
}

impl Reflector {
    pub fn new(brain: Arc<Brain>, temperature: f32) -> Self {
        Self { brain, temperature }
    }

    /// Assess `current` in light of all earlier rounds.
    ///
    /// LLM failures are fatal for the run.
    pub async fn reflect(
        &self,
        question: &str,
        current: &RoundResult,
        history: &[RoundResult],
        max_rounds: usize,
    ) -> Result<Reflection, ResearchError> {
        let prompt = build_prompt(question, current, history, max_rounds);
        let response = self
            .brain
            .generate(
                &prompt,
                Some(REFLECTOR_SYSTEM_PROMPT),
                GenerationConfig::new(self.temperature, 512),
            )
            .await
            .map_err(|source| ResearchError::Reflection {
                round: current.round_number,
                source,
            })?;

        let reflection = match parse_json_response::<ReflectorOutput>(&response) {
            Some(output) => Reflection {
                evidence_quality: output.evidence_quality,
                gaps_identified: output
                    .gaps_identified
                    .into_iter()
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect(),
                should_continue: output.should_continue,
                reasoning: output.reasoning,
            },
            None => {
                warn!(round = current.round_number, "Reflection output could not be parsed");
                Reflection::unparseable()
            }
        };
        debug!(
            round = current.round_number,
            quality = %reflection.evidence_quality,
            gaps = reflection.gaps_identified.len(),
            should_continue = reflection.should_continue,
            "Reflection complete"
        );
        Ok(reflection)
    }
}

fn build_prompt(question: &str, current: &RoundResult, history: &[RoundResult], max_rounds: usize) -> String {
    let mut prompt = format!(
        "Question: {}\nRound {} of at most {} (query: {})\n",
        escape_for_llm_prompt(question, 2000),
        current.round_number,
        max_rounds,
        escape_for_llm_prompt(&current.query, 500),
    );

    prompt.push_str("\nSources found this round:\n");
    for (kind, records) in &current.sources_by_provider {
        prompt.push_str(&format!("- {kind}: {}\n", records.len()));
    }
    for record in current.all_sources().take(MAX_TITLES_IN_PROMPT) {
        prompt.push_str(&format!("  * {}\n", escape_for_llm_prompt(record.title(), 200)));
    }

    let earlier: Vec<&RoundResult> = history
        .iter()
        .filter(|r| r.round_number < current.round_number)
        .collect();
    if !earlier.is_empty() {
        prompt.push_str("\nEarlier rounds:\n");
        for round in earlier {
            prompt.push_str(&format!(
                "- round {}: {} new sources",
                round.round_number, round.source_count
            ));
            if let Some(reflection) = &round.reflection {
                prompt.push_str(&format!(
                    ", quality {}, gaps: {}",
                    reflection.evidence_quality,
                    reflection.gaps_identified.join("; ")
                ));
            }
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nRespond as JSON: {\"evidence_quality\": \"low|medium|high\", \
         \"gaps_identified\": [\"...\"], \"should_continue\": true|false, \"reasoning\": \"...\"}",
    );
    prompt
}
