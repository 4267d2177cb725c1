//! Research engine: the single entry point that turns a question into either
//! a recall outcome, a model-only verdict, or a selected set of evidence.
//!
//! The engine owns one shared `Brain` and hands it to every component it
//! builds. A fatal failure anywhere in a run is reported once, as a terminal
//! `error` event, and returned to the caller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::events::{EventSink, ResearchEvent};
use super::fetcher::ProviderSet;
use super::orchestrator::{OrchestrationResult, RoundOrchestrator};
use super::planner::{ResearchPlan, ResearchPlanner};
use super::ranker::{RankingResult, RelevanceRanker};
use super::selector::{SelectionResult, SourceSelector};
use crate::brain::{Brain, TokenCounter};
use crate::config::{EngineConfig, SelectionConfig};
use crate::error::{EvidraError, ResearchError};
use crate::providers::{create_evidence_providers, create_llm_provider};
use crate::recall::{RecallHandler, RecallOutcome, SessionMatch, SessionStore};
use crate::router::{RouterClassification, Tier, TierRouter};
use crate::types::Question;

/// Everything a finished research run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub plan: ResearchPlan,
    pub orchestration: OrchestrationResult,
    pub ranking: RankingResult,
    pub selection: SelectionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum EngineOutcome {
    Recall {
        classification: RouterClassification,
        outcome: RecallOutcome,
    },
    /// Tier 1: the caller answers from model knowledge alone.
    ModelOnly {
        classification: RouterClassification,
    },
    Research {
        classification: RouterClassification,
        report: Box<ResearchReport>,
    },
}

impl EngineOutcome {
    pub fn classification(&self) -> &RouterClassification {
        match self {
            EngineOutcome::Recall { classification, .. }
            | EngineOutcome::ModelOnly { classification }
            | EngineOutcome::Research { classification, .. } => classification,
        }
    }
}

pub struct ResearchEngine {
    brain: Arc<Brain>,
    router: TierRouter,
    recall: RecallHandler,
    planner: ResearchPlanner,
    orchestrator: RoundOrchestrator,
    ranker: RelevanceRanker,
    selector: SourceSelector,
    selection: SelectionConfig,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl ResearchEngine {
    pub fn new(brain: Arc<Brain>, providers: ProviderSet, config: &EngineConfig) -> Self {
        let research = &config.research;
        Self {
            router: TierRouter::new(brain.clone(), config.router.clone()),
            recall: RecallHandler::new(brain.clone(), config.recall.clone()),
            planner: ResearchPlanner::new(
                brain.clone(),
                research.max_rounds,
                research.planner_temperature,
            ),
            orchestrator: RoundOrchestrator::new(brain.clone(), providers, research.clone()),
            ranker: RelevanceRanker::new(brain.clone(), config.ranking.clone()),
            selector: SourceSelector::new(TokenCounter::for_model(brain.model_name())),
            selection: config.selection.clone(),
            sessions: None,
            brain,
        }
    }

    /// Build an engine with the LLM and evidence providers named in `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EvidraError> {
        config.validate()?;
        let llm = create_llm_provider(&config.llm)?;
        let brain = Arc::new(Brain::new(llm).with_retries(config.llm.max_retries));
        let providers: ProviderSet =
            create_evidence_providers(&config.providers, config.research.provider_timeout_ms)?
                .into_iter()
                .collect();
        if providers.len() < 4 {
            warn!(configured = providers.len(), "Not every evidence provider is configured");
        }
        Ok(Self::new(brain, providers, config))
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    pub async fn classify(&self, question: &Question) -> RouterClassification {
        self.router.classify(question).await
    }

    /// Run `question` end to end, streaming progress into `sink`.
    pub async fn run(
        &self,
        question: &Question,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome, ResearchError> {
        let run_id = Uuid::new_v4();
        let result = self
            .run_inner(question, sink, cancel)
            .instrument(info_span!("research_run", %run_id))
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "Research run failed");
            sink.emit(ResearchEvent::Error {
                message: e.to_string(),
            });
        }
        result
    }

    async fn run_inner(
        &self,
        question: &Question,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome, ResearchError> {
        let classification = self.router.classify(question).await;
        info!(
            tier = %classification.tier,
            confidence = classification.confidence,
            "Question classified"
        );
        sink.emit(ResearchEvent::Classified {
            classification: classification.clone(),
        });

        match classification.tier {
            Tier::Recall => {
                let terms = classification
                    .search_terms
                    .clone()
                    .unwrap_or_else(|| question.text.clone());
                let matches = self.find_sessions(&terms).await;
                let outcome = self.recall.recall(question, matches).await?;
                sink.emit(ResearchEvent::RecallComplete {
                    outcome: outcome.clone(),
                });
                Ok(EngineOutcome::Recall {
                    classification,
                    outcome,
                })
            }
            Tier::Model => Ok(EngineOutcome::ModelOnly { classification }),
            Tier::Hybrid | Tier::Deep => {
                let report = self.research(question, sink, cancel).await?;
                Ok(EngineOutcome::Research {
                    classification,
                    report: Box::new(report),
                })
            }
        }
    }

    /// Session lookup failures degrade to "no match".
    async fn find_sessions(&self, terms: &str) -> Vec<SessionMatch> {
        let Some(store) = &self.sessions else {
            warn!("Recall requested but no session store is configured");
            return Vec::new();
        };
        match store.search(terms).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "Session search failed");
                Vec::new()
            }
        }
    }

    async fn research(
        &self,
        question: &Question,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled {
                completed_rounds: 0,
            });
        }

        sink.emit(ResearchEvent::PlanningStarted);
        let plan = self.planner.plan(question).await?;
        sink.emit(ResearchEvent::PlanningComplete { plan: plan.clone() });

        let orchestration = self.orchestrator.run(question, &plan, sink, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled {
                completed_rounds: orchestration.rounds.len(),
            });
        }

        sink.emit(ResearchEvent::SourceSelectionStarted);
        let ranking = self
            .ranker
            .rank(&question.text, orchestration.accumulated_sources())
            .await?;
        let selection = self.selector.select(&ranking.ranked_sources, &self.selection);
        sink.emit(ResearchEvent::SynthesisPreparation {
            selected_count: selection.selected_count,
            total_tokens: selection.total_tokens,
        });

        info!(
            rounds = orchestration.rounds.len(),
            accumulated = orchestration.total_sources(),
            selected = selection.selected_count,
            stop_reason = %orchestration.stop_reason,
            "Research run complete"
        );
        Ok(ResearchReport {
            plan,
            orchestration,
            ranking,
            selection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::providers::{EvidenceProvider, MockEvidenceProvider};
    use crate::recall::InMemorySessionStore;
    use crate::research::events::RecordingSink;
    use crate::research::sources::ProviderKind;

    fn engine(mock: Arc<MockLlmProvider>) -> ResearchEngine {
        let providers: ProviderSet = ProviderKind::ALL
            .into_iter()
            .map(|k| Arc::new(MockEvidenceProvider::synthetic(k)) as Arc<dyn EvidenceProvider>)
            .collect();
        ResearchEngine::new(Arc::new(Brain::new(mock)), providers, &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_model_only_runs_no_research() {
        let mock = Arc::new(MockLlmProvider::with_responses([r#"{"tier": 1, "reasoning": "general"}"#]));
        let sink = RecordingSink::new();
        let outcome = engine(mock.clone())
            .run(&Question::new("HbA1c nedir?"), &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, EngineOutcome::ModelOnly { .. }));
        assert_eq!(sink.names(), vec!["classified"]);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recall_without_store_is_no_match() {
        let mock = Arc::new(MockLlmProvider::new());
        let sink = RecordingSink::new();
        let outcome = engine(mock.clone())
            .run(&Question::new("Geçen sefer ne konuşmuştuk?"), &sink, &CancellationToken::new())
            .await
            .unwrap();
        let EngineOutcome::Recall { outcome, .. } = outcome else {
            panic!("expected recall outcome");
        };
        assert!(matches!(outcome, RecallOutcome::NoMatch { .. }));
        assert_eq!(sink.names(), vec!["classified", "recall_complete"]);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recall_uses_session_store() {
        let mock = Arc::new(MockLlmProvider::with_responses(["B12 düzeyini konuştuk."]));
        let store = InMemorySessionStore::new(vec![SessionMatch {
            session_id: "s1".into(),
            title: "Metformin ve B12".into(),
            summary: "Metformin kullanımında B12".into(),
            key_topics: vec!["metformin".into()],
            created_at: "2026-09-01T10:00:00Z".into(),
            conversation_history: Vec::new(),
            relevance_score: 0.0,
        }]);
        let engine = engine(mock.clone()).with_session_store(Arc::new(store));
        let outcome = engine
            .run(
                &Question::new("Metformin hakkında konuştuğumuzu hatırlıyor musun?"),
                &RecordingSink::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let EngineOutcome::Recall { outcome, .. } = outcome else {
            panic!("expected recall outcome");
        };
        let RecallOutcome::Answer { session, .. } = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(session.id, "s1");
        assert_eq!(session.date, "1 Eylül 2026");
    }

    #[tokio::test]
    async fn test_research_path_event_order() {
        let mock = Arc::new(MockLlmProvider::with_responses([
            r#"{"tier": 2, "reasoning": "needs evidence", "confidence": 0.9}"#,
            r#"{"strategy": "focused", "focus_areas": ["renal"], "estimated_rounds": 1}"#,
            r#"{"scores": []}"#,
        ]));
        let sink = RecordingSink::new();
        let outcome = engine(mock)
            .run(
                &Question::new("Metformin yan etkilerini araştır"),
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let EngineOutcome::Research { report, .. } = outcome else {
            panic!("expected research outcome");
        };
        assert_eq!(report.orchestration.rounds.len(), 1);
        assert!(report.selection.total_tokens <= 16_800);

        let names = sink.names();
        assert_eq!(names[..3], ["classified", "planning_started", "planning_complete"]);
        assert_eq!(names[3], "round_started");
        let n = names.len();
        assert_eq!(names[n - 2..], ["source_selection_started", "synthesis_preparation"]);
    }

    #[tokio::test]
    async fn test_fatal_planning_error_emits_single_error_event() {
        let mock = Arc::new(MockLlmProvider::with_responses([r#"{"tier": 2}"#]));
        mock.queue_error(crate::error::LlmError::AuthFailed {
            provider: "openai".into(),
        });
        let sink = RecordingSink::new();
        let result = engine(mock)
            .run(&Question::new("İnsülin araştır"), &sink, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ResearchError::Planning(_))));
        assert_eq!(sink.names(), vec!["classified", "planning_started", "error"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_research() {
        let mock = Arc::new(MockLlmProvider::with_responses([r#"{"tier": 2}"#]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = RecordingSink::new();
        let result = engine(mock).run(&Question::new("araştır"), &sink, &cancel).await;
        assert!(matches!(result, Err(ResearchError::Cancelled { completed_rounds: 0 })));
        assert_eq!(sink.count("error"), 1);
        assert_eq!(sink.count("planning_started"), 0);
    }
}
