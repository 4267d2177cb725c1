//! Relevance ranker: scores every accumulated source 0–100 against the
//! original question.
//!
//! Sources are scored by the LLM in batches. Sources a batch leaves unscored
//! (or whole batches whose output cannot be parsed) get a lexical overlap
//! score instead. The ranker only reorders and truncates; it never adds
//! records.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::sources::EvidenceRecord;
use crate::brain::{Brain, parse_json_response};
use crate::config::RankingConfig;
use crate::error::ResearchError;
use crate::sanitize::{escape_for_llm_prompt, word_tokens};
use crate::types::GenerationConfig;

const RANKER_SYSTEM_PROMPT: &str = "You grade how relevant medical sources are to a question. \
Answer with a single JSON object and nothing else.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSource {
    pub record: EvidenceRecord,
    /// 0–100.
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    /// Sorted by score, highest first; at most `top_n` entries.
    pub ranked_sources: Vec<RankedSource>,
    pub top_sources: Vec<RankedSource>,
    pub average_relevance: f64,
    pub ranking_duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ScoreEntry {
    index: usize,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct ScoreBatch {
    scores: Vec<ScoreEntry>,
}

pub struct RelevanceRanker {
    brain: Arc<Brain>,
    config: RankingConfig,
}

impl RelevanceRanker {
    pub fn new(brain: Arc<Brain>, config: RankingConfig) -> Self {
        Self { brain, config }
    }

    /// Rank `sources` against `question`.
    pub async fn rank(
        &self,
        question: &str,
        sources: Vec<EvidenceRecord>,
    ) -> Result<RankingResult, ResearchError> {
        let started = Instant::now();
        let total = sources.len();
        let mut scores: Vec<Option<f64>> = vec![None; total];

        let batch_size = self.config.batch_size.max(1);
        for (batch_no, chunk) in sources.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            let batch_scores = self.score_batch(question, chunk).await?;
            for (i, score) in batch_scores.into_iter().enumerate() {
                scores[offset + i] = score;
            }
        }

        let mut lexical_fallbacks = 0;
        let mut ranked: Vec<RankedSource> = sources
            .into_iter()
            .zip(scores)
            .map(|(record, score)| {
                let relevance_score = score.unwrap_or_else(|| {
                    lexical_fallbacks += 1;
                    lexical_relevance(question, &record)
                });
                RankedSource {
                    record,
                    relevance_score,
                }
            })
            .collect();

        // sort_by is stable: equal scores keep their accumulation order
        ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        ranked.truncate(self.config.top_n);

        let average_relevance = if ranked.is_empty() {
            0.0
        } else {
            ranked.iter().map(|r| r.relevance_score).sum::<f64>() / ranked.len() as f64
        };
        let top_sources = ranked.iter().take(self.config.top_k).cloned().collect();
        let ranking_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            accumulated = total,
            ranked = ranked.len(),
            lexical_fallbacks,
            average_relevance,
            duration_ms = ranking_duration_ms,
            "Ranking complete"
        );

        Ok(RankingResult {
            ranked_sources: ranked,
            top_sources,
            average_relevance,
            ranking_duration_ms,
        })
    }

    /// Score one batch. Entries are `None` where the model gave no usable score.
    async fn score_batch(
        &self,
        question: &str,
        batch: &[EvidenceRecord],
    ) -> Result<Vec<Option<f64>>, ResearchError> {
        let mut prompt = format!(
            "Question: {}\n\nSources:\n",
            escape_for_llm_prompt(question, 2000)
        );
        for (i, record) in batch.iter().enumerate() {
            prompt.push_str(&format!(
                "[{i}] ({}) {}\n    {}\n",
                record.kind(),
                escape_for_llm_prompt(record.title(), 300),
                escape_for_llm_prompt(record.snippet(), self.config.snippet_chars),
            ));
        }
        prompt.push_str(
            "\nScore each source from 0 to 100 for relevance to the question. \
             Respond as JSON: {\"scores\": [{\"index\": 0, \"score\": 85}]}",
        );

        let response = self
            .brain
            .generate(
                &prompt,
                Some(RANKER_SYSTEM_PROMPT),
                GenerationConfig::new(self.config.temperature, 1024),
            )
            .await
            .map_err(ResearchError::Ranking)?;

        let mut scores = vec![None; batch.len()];
        match parse_json_response::<ScoreBatch>(&response) {
            Some(parsed) => {
                for entry in parsed.scores {
                    if entry.index < batch.len() && entry.score.is_finite() {
                        scores[entry.index] = Some(entry.score.clamp(0.0, 100.0));
                    } else {
                        debug!(index = entry.index, "Ignoring out-of-range score entry");
                    }
                }
            }
            None => warn!(batch_len = batch.len(), "Ranking output could not be parsed"),
        }
        Ok(scores)
    }
}

/// Share of the question's words found in the source title and snippet, scaled to 0–100.
pub fn lexical_relevance(question: &str, record: &EvidenceRecord) -> f64 {
    let question_terms: HashSet<String> = word_tokens(question, 3).into_iter().collect();
    if question_terms.is_empty() {
        return 0.0;
    }
    let doc_terms: HashSet<String> = word_tokens(&format!("{} {}", record.title(), record.snippet()), 3)
        .into_iter()
        .collect();
    let overlap = question_terms.intersection(&doc_terms).count();
    (overlap as f64 / question_terms.len() as f64 * 100.0).round()
}
