//! The research pipeline: planning, the multi-round fetch/reflect/refine
//! loop, cross-round deduplication, ranking and final source selection.
//!
//! `engine::ResearchEngine` composes these into one run; each component is
//! also usable on its own.

pub mod analyzer;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod fetcher;
pub mod orchestrator;
pub mod planner;
pub mod ranker;
pub mod reflector;
pub mod refiner;
pub mod selector;
pub mod sources;
pub mod stopping;

pub use analyzer::{BudgetDistribution, QueryAnalyzer};
pub use dedup::SourceDeduplicator;
pub use engine::{EngineOutcome, ResearchEngine, ResearchReport};
pub use events::{EventSink, NoOpSink, RecordingSink, ResearchEvent, SourceSummary};
pub use fetcher::{ProviderOutcome, ProviderSet, RoundFetch, RoundFetcher};
pub use orchestrator::{OrchestrationResult, RoundBudget, RoundOrchestrator, RoundResult, RoundStatus};
pub use planner::{ResearchPlan, ResearchPlanner};
pub use ranker::{RankedSource, RankingResult, RelevanceRanker};
pub use reflector::{EvidenceQuality, Reflection, Reflector};
pub use refiner::QueryRefiner;
pub use selector::{QualityMetrics, SelectionResult, SelectionStrategy, SourceSelector};
pub use sources::{EvidenceRecord, ProviderKind};
pub use stopping::{StoppingDecision, StoppingEvaluator};
