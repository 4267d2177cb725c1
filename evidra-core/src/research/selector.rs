//! Source selector: token-budgeted final subset for synthesis.
//!
//! Starts from the `base_limit` best sources, widens the window to
//! `extended_limit` when enough of the base window is high quality, drops
//! weak sources, suppresses near-duplicates (Jaccard similarity of title and
//! snippet words, higher-ranked copy kept), then accumulates sources until
//! the next one would exceed the token budget.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use super::ranker::RankedSource;
use super::sources::ProviderKind;
use crate::brain::TokenCounter;
use crate::config::SelectionConfig;
use crate::sanitize::word_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    Base,
    Extended,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub average_relevance: f64,
    pub min_relevance: f64,
    pub max_relevance: f64,
    pub high_quality_count: usize,
    pub provider_distribution: BTreeMap<ProviderKind, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected_sources: Vec<RankedSource>,
    pub selected_count: usize,
    /// Near-duplicates removed.
    pub deduplicated_count: usize,
    pub total_tokens: usize,
    pub selection_strategy: SelectionStrategy,
    pub quality_metrics: QualityMetrics,
}

pub struct SourceSelector {
    token_counter: TokenCounter,
}

impl SourceSelector {
    pub fn new(token_counter: TokenCounter) -> Self {
        Self { token_counter }
    }

    /// Estimated synthesis tokens for one source.
    pub fn estimate_tokens(&self, source: &RankedSource) -> usize {
        self.token_counter.count(&source.record.synthesis_text())
    }

    pub fn select(&self, ranked: &[RankedSource], config: &SelectionConfig) -> SelectionResult {
        let base_len = config.base_limit.min(ranked.len());
        let base_window = &ranked[..base_len];
        let high_in_base = base_window
            .iter()
            .filter(|s| s.relevance_score >= config.high_quality_threshold)
            .count();

        let extend = base_len > 0
            && config.extended_limit > config.base_limit
            && high_in_base as f64 / base_len as f64 >= config.extension_ratio;
        let (strategy, window) = if extend {
            let len = config.extended_limit.min(ranked.len());
            (SelectionStrategy::Extended, &ranked[..len])
        } else {
            (SelectionStrategy::Base, base_window)
        };

        let mut kept_terms: Vec<HashSet<String>> = Vec::new();
        let mut selected: Vec<RankedSource> = Vec::new();
        let mut deduplicated_count = 0;
        let mut total_tokens = 0;

        for source in window {
            if source.relevance_score < config.min_relevance_score {
                continue;
            }

            let terms = similarity_terms(source);
            if config.enable_semantic_dedup
                && kept_terms
                    .iter()
                    .any(|kept| jaccard(kept, &terms) > config.semantic_similarity_threshold)
            {
                debug!(title = source.record.title(), "Dropping near-duplicate source");
                deduplicated_count += 1;
                continue;
            }

            let tokens = self.estimate_tokens(source);
            if total_tokens + tokens > config.token_budget {
                debug!(
                    total_tokens,
                    next = tokens,
                    budget = config.token_budget,
                    "Token budget reached"
                );
                break;
            }
            total_tokens += tokens;
            kept_terms.push(terms);
            selected.push(source.clone());
        }

        let quality_metrics = quality_metrics(&selected, config.high_quality_threshold);
        info!(
            strategy = ?strategy,
            selected = selected.len(),
            deduplicated = deduplicated_count,
            total_tokens,
            "Source selection complete"
        );

        SelectionResult {
            selected_count: selected.len(),
            selected_sources: selected,
            deduplicated_count,
            total_tokens,
            selection_strategy: strategy,
            quality_metrics,
        }
    }
}

impl Default for SourceSelector {
    fn default() -> Self {
        Self::new(TokenCounter::default())
    }
}

fn similarity_terms(source: &RankedSource) -> HashSet<String> {
    word_tokens(
        &format!("{} {}", source.record.title(), source.record.snippet()),
        2,
    )
    .into_iter()
    .collect()
}

/// Jaccard similarity; two empty sets are treated as dissimilar.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn quality_metrics(selected: &[RankedSource], high_quality_threshold: f64) -> QualityMetrics {
    if selected.is_empty() {
        return QualityMetrics::default();
    }
    let scores = selected.iter().map(|s| s.relevance_score);
    let mut provider_distribution = BTreeMap::new();
    for source in selected {
        *provider_distribution.entry(source.record.kind()).or_insert(0) += 1;
    }
    QualityMetrics {
        average_relevance: scores.clone().sum::<f64>() / selected.len() as f64,
        min_relevance: scores.clone().fold(f64::INFINITY, f64::min),
        max_relevance: scores.fold(f64::NEG_INFINITY, f64::max),
        high_quality_count: selected
            .iter()
            .filter(|s| s.relevance_score >= high_quality_threshold)
            .count(),
        provider_distribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::sources::EvidenceRecord;

    fn ranked(score: f64, i: usize) -> RankedSource {
        RankedSource {
            record: EvidenceRecord::web(
                format!("https://x.org/{i}"),
                format!("Distinct title number {i} topic{i}"),
                format!("unique{i} body{i} words{i}"),
            ),
            relevance_score: score,
        }
    }

    #[test]
    fn test_base_strategy_when_few_high_quality() {
        let sources: Vec<RankedSource> = (0..40).map(|i| ranked(if i < 5 { 90.0 } else { 50.0 }, i)).collect();
        let result = SourceSelector::default().select(&sources, &SelectionConfig::default());
        assert_eq!(result.selection_strategy, SelectionStrategy::Base);
        assert_eq!(result.selected_count, 20);
        assert_eq!(result.quality_metrics.high_quality_count, 5);
    }

    #[test]
    fn test_extended_strategy() {
        let sources: Vec<RankedSource> = (0..40).map(|i| ranked(95.0 - i as f64, i)).collect();
        let result = SourceSelector::default().select(&sources, &SelectionConfig::default());
        assert_eq!(result.selection_strategy, SelectionStrategy::Extended);
        assert_eq!(result.selected_count, 30);
        assert_eq!(result.quality_metrics.max_relevance, 95.0);
        assert_eq!(result.quality_metrics.min_relevance, 66.0);
    }

    #[test]
    fn test_min_relevance_filter() {
        let sources = vec![ranked(80.0, 0), ranked(39.9, 1), ranked(40.0, 2)];
        let result = SourceSelector::default().select(&sources, &SelectionConfig::default());
        assert_eq!(result.selected_count, 2);
        assert!(result.selected_sources.iter().all(|s| s.relevance_score >= 40.0));
    }

    #[test]
    fn test_near_duplicates_keep_higher_ranked() {
        let a = RankedSource {
            record: EvidenceRecord::web("https://a.org", "Metformin and vitamin B12 deficiency", "long term use"),
            relevance_score: 90.0,
        };
        let b = RankedSource {
            record: EvidenceRecord::web("https://b.org", "Metformin and vitamin B12 deficiency", "long term use"),
            relevance_score: 85.0,
        };
        let c = ranked(80.0, 3);
        let result = SourceSelector::default().select(&[a, b.clone(), c], &SelectionConfig::default());
        assert_eq!(result.selected_count, 2);
        assert_eq!(result.deduplicated_count, 1);
        assert_eq!(result.selected_sources[0].record.url(), "https://a.org");

        let config = SelectionConfig {
            enable_semantic_dedup: false,
            ..SelectionConfig::default()
        };
        let result = SourceSelector::default().select(&[b.clone(), b], &config);
        assert_eq!(result.selected_count, 2);
    }

    #[test]
    fn test_token_budget_respected() {
        let selector = SourceSelector::default();
        let sources: Vec<RankedSource> = (0..20).map(|i| ranked(80.0, i)).collect();
        let per_source = selector.estimate_tokens(&sources[0]);
        let config = SelectionConfig {
            token_budget: per_source * 3 + per_source / 2,
            ..SelectionConfig::default()
        };
        let result = selector.select(&sources, &config);
        assert!(result.total_tokens <= config.token_budget);
        assert!(result.selected_count <= 4);
        assert!(result.selected_count >= 2);
    }

    #[test]
    fn test_empty_input() {
        let result = SourceSelector::default().select(&[], &SelectionConfig::default());
        assert_eq!(result.selected_count, 0);
        assert_eq!(result.total_tokens, 0);
        assert_eq!(result.selection_strategy, SelectionStrategy::Base);
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
