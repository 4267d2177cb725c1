//! Research planner: one LLM call proposing strategy, focus areas and an
//! estimated round count.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::brain::{Brain, parse_json_response};
use crate::error::ResearchError;
use crate::sanitize::escape_for_llm_prompt;
use crate::types::{GenerationConfig, Question};

const PLANNER_SYSTEM_PROMPT: &str = "You plan evidence gathering for health questions. \
Answer with a single JSON object and nothing else.";

/// The plan of a research run. Created once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub strategy: String,
    pub focus_areas: Vec<String>,
    /// Always at least 1.
    pub estimated_rounds: usize,
}

impl ResearchPlan {
    /// Plan used when the planner output cannot be parsed.
    pub fn fallback(question: &str) -> Self {
        Self {
            strategy: "broad".to_string(),
            focus_areas: vec![question.to_string()],
            estimated_rounds: 2,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default, alias = "focusAreas")]
    focus_areas: Vec<String>,
    #[serde(default, alias = "estimatedRounds")]
    estimated_rounds: Option<i64>,
}

pub struct ResearchPlanner {
    brain: Arc<Brain>,
    max_rounds: usize,
    temperature: f32,
}

impl ResearchPlanner {
    pub fn new(brain: Arc<Brain>, max_rounds: usize, temperature: f32) -> Self {
        Self {
            brain,
            max_rounds: max_rounds.max(1),
            temperature,
        }
    }

    /// Produce the plan for `question`.
    ///
    /// A provider error is fatal. Unparseable output yields `ResearchPlan::fallback`.
    pub async fn plan(&self, question: &Question) -> Result<ResearchPlan, ResearchError> {
        let prompt = self.build_prompt(question);
        let response = self
            .brain
            .generate(
                &prompt,
                Some(PLANNER_SYSTEM_PROMPT),
                GenerationConfig::new(self.temperature, 512),
            )
            .await
            .map_err(ResearchError::Planning)?;

        let plan = self.parse_plan(&response, &question.text);
        info!(
            strategy = %plan.strategy,
            focus_areas = plan.focus_areas.len(),
            estimated_rounds = plan.estimated_rounds,
            "Research plan ready"
        );
        Ok(plan)
    }

    fn build_prompt(&self, question: &Question) -> String {
        let mut prompt = format!(
            "Question: {}\n",
            escape_for_llm_prompt(&question.text, 2000)
        );
        if let Some(profile) = question.profile.as_ref().and_then(|p| p.describe()) {
            prompt.push_str(&format!("User profile: {}\n", escape_for_llm_prompt(&profile, 500)));
        }
        prompt.push_str(&format!(
            "\nPlan the search. Respond as JSON: \
             {{\"strategy\": \"broad|focused|comparative\", \"focus_areas\": [\"...\"], \
             \"estimated_rounds\": 1-{}}}",
            self.max_rounds
        ));
        prompt
    }

    fn parse_plan(&self, response: &str, question: &str) -> ResearchPlan {
        let Some(output) = parse_json_response::<PlannerOutput>(response) else {
            warn!("Planner output could not be parsed; using fallback plan");
            return ResearchPlan::fallback(question);
        };

        let fallback = ResearchPlan::fallback(question);
        let focus_areas: Vec<String> = output
            .focus_areas
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        let estimated_rounds = output
            .estimated_rounds
            .map(|r| r.clamp(1, self.max_rounds as i64) as usize)
            .unwrap_or(fallback.estimated_rounds.min(self.max_rounds));

        ResearchPlan {
            strategy: output
                .strategy
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(fallback.strategy),
            focus_areas: if focus_areas.is_empty() {
                fallback.focus_areas
            } else {
                focus_areas
            },
            estimated_rounds,
        }
    }
}
