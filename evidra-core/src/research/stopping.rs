//! Stopping-condition evaluator.
//!
//! Deterministic policy over round number, cap, the current round, the round
//! history and the reflection. Rules are checked in order and the first that
//! fires decides:
//! 1. the round cap is reached
//! 2. the reflector recommends stopping
//! 3. evidence quality is high and no gaps remain
//! 4. the round produced no new sources
//! 5. new sources fell below the diminishing-returns ratio of the previous round

use serde::{Deserialize, Serialize};

use super::orchestrator::RoundResult;
use super::reflector::{EvidenceQuality, Reflection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppingDecision {
    pub should_stop: bool,
    pub reason: String,
}

impl StoppingDecision {
    fn stop(reason: impl Into<String>) -> Self {
        Self {
            should_stop: true,
            reason: reason.into(),
        }
    }

    fn proceed(reason: impl Into<String>) -> Self {
        Self {
            should_stop: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoppingEvaluator {
    diminishing_returns_ratio: f64,
}

impl StoppingEvaluator {
    /// `diminishing_returns_ratio` of 0 disables rule 5.
    pub fn new(diminishing_returns_ratio: f64) -> Self {
        Self {
            diminishing_returns_ratio: diminishing_returns_ratio.max(0.0),
        }
    }

    pub fn evaluate(
        &self,
        round: usize,
        cap: usize,
        current: &RoundResult,
        history: &[RoundResult],
        reflection: &Reflection,
    ) -> StoppingDecision {
        if round >= cap {
            return StoppingDecision::stop(format!("round cap of {cap} reached"));
        }
        if !reflection.should_continue {
            return StoppingDecision::stop(format!(
                "reflection recommends stopping: {}",
                reflection.reasoning
            ));
        }
        if reflection.evidence_quality == EvidenceQuality::High && !reflection.has_gaps() {
            return StoppingDecision::stop("evidence quality is high and no gaps remain");
        }
        if current.source_count == 0 {
            return StoppingDecision::stop(format!("round {round} found no new sources"));
        }

        let previous = history
            .iter()
            .rev()
            .find(|r| r.round_number < current.round_number);
        if let Some(previous) = previous
            && self.diminishing_returns_ratio > 0.0
            && previous.source_count > 0
        {
            let floor = previous.source_count as f64 * self.diminishing_returns_ratio;
            if (current.source_count as f64) < floor {
                return StoppingDecision::stop(format!(
                    "diminishing returns: {} new sources after {} in round {}",
                    current.source_count, previous.source_count, previous.round_number
                ));
            }
        }

        if reflection.has_gaps() {
            StoppingDecision::proceed(format!(
                "{} gap(s) identified",
                reflection.gaps_identified.len()
            ))
        } else {
            StoppingDecision::proceed("reflection requests more evidence")
        }
    }
}

impl Default for StoppingEvaluator {
    fn default() -> Self {
        Self::new(0.2)
    }
}
