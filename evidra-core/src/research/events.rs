//! Research progress events and their delivery.
//!
//! A run emits an ordered, append-only stream of `ResearchEvent`s. Provider
//! start/completion events inside a round arrive in completion order; all
//! round-level events arrive in strict round order.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::orchestrator::RoundStatus;
use super::planner::ResearchPlan;
use super::reflector::Reflection;
use super::sources::{EvidenceRecord, ProviderKind};
use crate::recall::RecallOutcome;
use crate::router::RouterClassification;

/// Compact description of a source for `round_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub title: String,
    pub url: String,
    pub source_type: ProviderKind,
}

impl From<&EvidenceRecord> for SourceSummary {
    fn from(record: &EvidenceRecord) -> Self {
        Self {
            title: record.title().to_string(),
            url: record.url().to_string(),
            source_type: record.kind(),
        }
    }
}

/// Events emitted during a single engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    /// The router has decided how the question is answered.
    Classified {
        classification: RouterClassification,
    },
    /// The recall path produced its outcome.
    RecallComplete { outcome: RecallOutcome },
    PlanningStarted,
    PlanningComplete { plan: ResearchPlan },
    RoundStarted {
        round: usize,
        query: String,
        estimated_sources: usize,
    },
    ApiStarted {
        api: ProviderKind,
        count: usize,
        query: String,
    },
    ApiCompleted {
        api: ProviderKind,
        count: usize,
        duration_ms: u64,
        success: bool,
    },
    /// Sampled, not exhaustive.
    SourceFound {
        title: String,
        source_type: ProviderKind,
    },
    RoundComplete {
        round: usize,
        source_count: usize,
        duration_ms: u64,
        sources: Vec<SourceSummary>,
        status: RoundStatus,
    },
    ReflectionStarted { round: usize },
    ReflectionComplete { round: usize, reflection: Reflection },
    SourceSelectionStarted,
    SynthesisPreparation {
        selected_count: usize,
        total_tokens: usize,
    },
    /// Terminal failure of the run.
    Error { message: String },
}

impl ResearchEvent {
    /// The wire name of this event (the serde tag).
    pub fn name(&self) -> &'static str {
        match self {
            ResearchEvent::Classified { .. } => "classified",
            ResearchEvent::RecallComplete { .. } => "recall_complete",
            ResearchEvent::PlanningStarted => "planning_started",
            ResearchEvent::PlanningComplete { .. } => "planning_complete",
            ResearchEvent::RoundStarted { .. } => "round_started",
            ResearchEvent::ApiStarted { .. } => "api_started",
            ResearchEvent::ApiCompleted { .. } => "api_completed",
            ResearchEvent::SourceFound { .. } => "source_found",
            ResearchEvent::RoundComplete { .. } => "round_complete",
            ResearchEvent::ReflectionStarted { .. } => "reflection_started",
            ResearchEvent::ReflectionComplete { .. } => "reflection_complete",
            ResearchEvent::SourceSelectionStarted => "source_selection_started",
            ResearchEvent::SynthesisPreparation { .. } => "synthesis_preparation",
            ResearchEvent::Error { .. } => "error",
        }
    }
}

/// Receives the events of a run in emission order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ResearchEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: ResearchEvent) {}
}

impl EventSink for mpsc::UnboundedSender<ResearchEvent> {
    fn emit(&self, event: ResearchEvent) {
        // A closed receiver means the consumer went away; the run is cancelled separately.
        let _ = self.send(event);
    }
}

/// Stores every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResearchEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResearchEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ResearchEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ResearchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_uses_snake_case_tag() {
        let event = ResearchEvent::ApiCompleted {
            api: ProviderKind::Journal,
            count: 4,
            duration_ms: 120,
            success: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "api_completed");
        assert_eq!(json["api"], "pubmed");
        assert_eq!(event.name(), "api_completed");

        let json = serde_json::to_value(ResearchEvent::PlanningStarted).unwrap();
        assert_eq!(json, serde_json::json!({"type": "planning_started"}));
    }

    #[test]
    fn test_event_names_match_serde_tags() {
        let events = vec![
            ResearchEvent::PlanningStarted,
            ResearchEvent::RoundStarted {
                round: 1,
                query: "q".into(),
                estimated_sources: 25,
            },
            ResearchEvent::SourceFound {
                title: "t".into(),
                source_type: ProviderKind::Web,
            },
            ResearchEvent::ReflectionStarted { round: 1 },
            ResearchEvent::SourceSelectionStarted,
            ResearchEvent::SynthesisPreparation {
                selected_count: 3,
                total_tokens: 900,
            },
            ResearchEvent::Error {
                message: "boom".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.name());
        }
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.emit(ResearchEvent::PlanningStarted);
        sink.emit(ResearchEvent::SourceSelectionStarted);
        assert_eq!(sink.names(), vec!["planning_started", "source_selection_started"]);
        assert_eq!(sink.count("planning_started"), 1);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(ResearchEvent::PlanningStarted);
        drop(tx);
        assert_eq!(rx.recv().await, Some(ResearchEvent::PlanningStarted));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_source_summary_from_record() {
        let record = EvidenceRecord::trial("NCT9", "Trial", "");
        let summary = SourceSummary::from(&record);
        assert_eq!(summary.source_type, ProviderKind::Trials);
        assert_eq!(summary.url, "https://clinicaltrials.gov/study/NCT9");
    }
}
