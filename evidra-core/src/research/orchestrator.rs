//! Round orchestrator: the bounded fetch / reflect / stop / refine loop.
//!
//! ```text
//! RoundActive(n) -> Reflecting(n) -> Refining(n) -> RoundActive(n + 1)
//!                                 \-> Stopped
//! ```
//!
//! Round 1 requests the broad budget, later rounds the focused one. The last
//! allowed round (`min(plan.estimated_rounds, max_rounds)`) is never reflected
//! on. Reflector and refiner failures abort the run; provider failures only
//! mark the round as partial.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::analyzer::QueryAnalyzer;
use super::dedup::SourceDeduplicator;
use super::events::{EventSink, ResearchEvent, SourceSummary};
use super::fetcher::{ProviderOutcome, ProviderSet, RoundFetcher};
use super::planner::ResearchPlan;
use super::refiner::QueryRefiner;
use super::reflector::{Reflection, Reflector};
use super::sources::{EvidenceRecord, ProviderKind};
use super::stopping::StoppingEvaluator;
use crate::brain::Brain;
use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::types::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    /// Every provider call succeeded.
    Complete,
    /// At least one provider failed or timed out.
    Partial,
}

/// One completed round. Appended to the run history and not changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    /// 1-based.
    pub round_number: usize,
    pub query: String,
    /// Deduplicated against every earlier round of the run.
    pub sources_by_provider: BTreeMap<ProviderKind, Vec<EvidenceRecord>>,
    pub source_count: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Reflection>,
    #[serde(default)]
    pub provider_outcomes: Vec<ProviderOutcome>,
}

impl RoundResult {
    pub fn new(
        round_number: usize,
        query: String,
        sources_by_provider: BTreeMap<ProviderKind, Vec<EvidenceRecord>>,
        duration_ms: u64,
        provider_outcomes: Vec<ProviderOutcome>,
    ) -> Self {
        let source_count = sources_by_provider.values().map(Vec::len).sum();
        Self {
            round_number,
            query,
            sources_by_provider,
            source_count,
            duration_ms,
            reflection: None,
            provider_outcomes,
        }
    }

    /// All sources of this round, primary provider first.
    pub fn all_sources(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.sources_by_provider.values().flatten()
    }

    pub fn status(&self) -> RoundStatus {
        if self.provider_outcomes.iter().all(|o| o.success) {
            RoundStatus::Complete
        } else {
            RoundStatus::Partial
        }
    }
}

/// Per-round request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundBudget {
    pub primary: usize,
    pub others: usize,
}

impl RoundBudget {
    pub fn total(&self) -> usize {
        self.primary + self.others
    }
}

/// The round history of a finished loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub rounds: Vec<RoundResult>,
    pub stop_reason: String,
}

impl OrchestrationResult {
    /// Every source of every round, in round order.
    pub fn accumulated_sources(&self) -> Vec<EvidenceRecord> {
        self.rounds
            .iter()
            .flat_map(|r| r.all_sources().cloned())
            .collect()
    }

    pub fn total_sources(&self) -> usize {
        self.rounds.iter().map(|r| r.source_count).sum()
    }
}

pub struct RoundOrchestrator {
    fetcher: RoundFetcher,
    analyzer: QueryAnalyzer,
    reflector: Reflector,
    refiner: QueryRefiner,
    evaluator: StoppingEvaluator,
    config: ResearchConfig,
}

impl RoundOrchestrator {
    pub fn new(brain: Arc<Brain>, providers: ProviderSet, config: ResearchConfig) -> Self {
        Self {
            fetcher: RoundFetcher::new(providers, Duration::from_millis(config.provider_timeout_ms)),
            analyzer: QueryAnalyzer::new(),
            reflector: Reflector::new(brain.clone(), config.reflector_temperature),
            refiner: QueryRefiner::new(brain, config.refiner_temperature),
            evaluator: StoppingEvaluator::new(config.diminishing_returns_ratio),
            config,
        }
    }

    pub fn budget_for_round(&self, round: usize) -> RoundBudget {
        if round <= 1 {
            RoundBudget {
                primary: self.config.first_round_primary,
                others: self.config.first_round_others,
            }
        } else {
            RoundBudget {
                primary: self.config.later_round_primary,
                others: self.config.later_round_others,
            }
        }
    }

    /// Number of rounds this plan may run.
    pub fn round_cap(&self, plan: &ResearchPlan) -> usize {
        plan.estimated_rounds.min(self.config.max_rounds).max(1)
    }

    /// Run the round loop for `question` under `plan`.
    ///
    /// Cancellation is observed between rounds: a round that has started
    /// finishes its provider calls before the run stops.
    pub async fn run(
        &self,
        question: &Question,
        plan: &ResearchPlan,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationResult, ResearchError> {
        let cap = self.round_cap(plan);
        let mut dedup = SourceDeduplicator::new();
        let mut history: Vec<RoundResult> = Vec::with_capacity(cap);
        let mut query = question.text.clone();
        let mut stop_reason = format!("all {cap} planned round(s) completed");

        for round_number in 1..=cap {
            if cancel.is_cancelled() {
                info!(completed_rounds = history.len(), "Research run cancelled");
                return Err(ResearchError::Cancelled {
                    completed_rounds: history.len(),
                });
            }

            let mut round = self.run_round(round_number, &query, &mut dedup, sink).await;

            if round_number == cap {
                history.push(round);
                break;
            }
            if cancel.is_cancelled() {
                history.push(round);
                info!(completed_rounds = history.len(), "Research run cancelled");
                return Err(ResearchError::Cancelled {
                    completed_rounds: history.len(),
                });
            }

            sink.emit(ResearchEvent::ReflectionStarted {
                round: round_number,
            });
            let reflection = self
                .reflector
                .reflect(&question.text, &round, &history, cap)
                .await?;
            sink.emit(ResearchEvent::ReflectionComplete {
                round: round_number,
                reflection: reflection.clone(),
            });

            let decision = self
                .evaluator
                .evaluate(round_number, cap, &round, &history, &reflection);
            round.reflection = Some(reflection);
            history.push(round);

            if decision.should_stop {
                info!(round = round_number, reason = %decision.reason, "Stopping research");
                stop_reason = decision.reason;
                break;
            }

            let gaps = history
                .last()
                .and_then(|r| r.reflection.as_ref())
                .map(|r| r.gaps_identified.clone())
                .unwrap_or_default();
            if !gaps.is_empty() {
                query = self
                    .refiner
                    .refine(&question.text, &gaps, round_number + 1)
                    .await?;
            }
        }

        let result = OrchestrationResult {
            rounds: history,
            stop_reason,
        };
        info!(
            rounds = result.rounds.len(),
            total_sources = result.total_sources(),
            reason = %result.stop_reason,
            "Round loop finished"
        );
        Ok(result)
    }

    async fn run_round(
        &self,
        round_number: usize,
        query: &str,
        dedup: &mut SourceDeduplicator,
        sink: &dyn EventSink,
    ) -> RoundResult {
        let started = Instant::now();
        let budget = self.budget_for_round(round_number);
        let distribution = self.analyzer.analyze(query, budget.others);
        let planned = budget.primary + distribution.total();
        if planned != budget.total() {
            warn!(
                round = round_number,
                expected = budget.total(),
                planned,
                "Provider budget does not sum to the round budget"
            );
        }

        sink.emit(ResearchEvent::RoundStarted {
            round: round_number,
            query: query.to_string(),
            estimated_sources: budget.total(),
        });

        let allocation: Vec<(ProviderKind, usize)> = ProviderKind::ALL
            .into_iter()
            .map(|kind| {
                let count = if kind.is_primary() {
                    budget.primary
                } else {
                    distribution.get(kind)
                };
                (kind, count)
            })
            .collect();

        let fetched = self.fetcher.fetch_round(query, &allocation, sink).await;

        // All provider results are in; only now touch the run-wide identity sets.
        let mut sources_by_provider = BTreeMap::new();
        for (kind, records) in fetched.records {
            let fresh = dedup.filter(kind, records);
            for record in fresh.iter().take(self.config.source_samples_per_provider) {
                sink.emit(ResearchEvent::SourceFound {
                    title: record.title().to_string(),
                    source_type: kind,
                });
            }
            sources_by_provider.insert(kind, fresh);
        }

        let round = RoundResult::new(
            round_number,
            query.to_string(),
            sources_by_provider,
            started.elapsed().as_millis() as u64,
            fetched.outcomes,
        );

        sink.emit(ResearchEvent::RoundComplete {
            round: round_number,
            source_count: round.source_count,
            duration_ms: round.duration_ms,
            sources: round.all_sources().map(SourceSummary::from).collect(),
            status: round.status(),
        });
        info!(
            round = round_number,
            sources = round.source_count,
            status = ?round.status(),
            duration_ms = round.duration_ms,
            "Round complete"
        );
        round
    }
}
