//! Tier router: decides how a question is answered before any research runs.
//!
//! Tiers: 0 recall, 1 model only, 2 hybrid research, 3 deep research.
//!
//! Recall detection is deterministic and runs first, as an ordered list of
//! named `RecallRule`s. Only when no rule matches is the LLM classifier
//! consulted, and its answer passes two guardrails: tier 3 collapses to tier
//! 2 while deep research is disabled, and tier 2 requires the literal trigger
//! keyword in the question. The router never fails; any classifier problem
//! yields tier 1 with confidence 0.5.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::brain::{Brain, parse_json_response};
use crate::config::RouterConfig;
use crate::sanitize::{collapse_whitespace, escape_for_llm_prompt, turkish_lowercase};
use crate::types::{GenerationConfig, Question};

const ROUTER_SYSTEM_PROMPT: &str = "You route diabetes questions. \
Answer with a single JSON object and nothing else.";

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Tier {
    Recall = 0,
    Model = 1,
    Hybrid = 2,
    Deep = 3,
}

impl Tier {
    /// Whether this tier runs the research orchestrator.
    pub fn runs_research(&self) -> bool {
        matches!(self, Tier::Hybrid | Tier::Deep)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::Recall),
            1 => Ok(Tier::Model),
            2 => Ok(Tier::Hybrid),
            3 => Ok(Tier::Deep),
            other => Err(format!("invalid tier {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tier::Recall => "recall",
            Tier::Model => "model",
            Tier::Hybrid => "hybrid",
            Tier::Deep => "deep",
        };
        write!(f, "{} ({name})", *self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterClassification {
    pub tier: Tier,
    pub reasoning: String,
    /// 0.0–1.0.
    pub confidence: f64,
    pub explicit_deep_request: bool,
    pub is_recall_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_terms: Option<String>,
}

/// Which family of phrasing a recall rule recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallFamily {
    /// "araştırmıştık", "konuşmuştuk", "sormuştum"
    PastTense,
    /// "hatırlıyor musun", "geçen sefer", "daha önce konuşmuştuk"
    MemoryPhrase,
    /// "o araştırma", "şu konu"
    Demonstrative,
}

/// A named predicate over the lowercased question.
pub struct RecallRule {
    pub name: &'static str,
    pub family: RecallFamily,
    pattern: Regex,
}

impl RecallRule {
    pub fn new(name: &'static str, family: RecallFamily, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            family,
            pattern: Regex::new(pattern)?,
        })
    }

    /// `lowered` must already be Turkish-lowercased.
    pub fn matches(&self, lowered: &str) -> bool {
        self.pattern.is_match(lowered)
    }
}

/// The built-in recall rules, evaluated in this order.
pub fn default_recall_rules() -> Vec<RecallRule> {
    use RecallFamily::*;
    let specs: [(&'static str, RecallFamily, &str); 11] = [
        ("past_research", PastTense, r"araştırmış(tık|tım|tınız)\b|araştırdık\b"),
        ("past_conversation", PastTense, r"konuşmuş(tuk|tum)\b|konuştuk\b"),
        ("past_question", PastTense, r"sormuş(tum|tuk)\b|sorduğum"),
        ("past_mention", PastTense, r"bahsetmiş(tik|tim)\b|bahsettiğin"),
        ("remember", MemoryPhrase, r"hatırlıyor musun|hatırlar mısın|hatırlat"),
        ("last_time", MemoryPhrase, r"geçen (sefer|hafta|gün|ay)"),
        (
            "previously",
            MemoryPhrase,
            r"daha önce\b[^,.;?!]{0,40}?\b(konuş(muş|tu|tuğ)|araştır(mış|dı|dığ)|sor(muş|du|duğ)|bahset(miş|ti|tiğ)|söyle(miş|di|diğ)|anlat(mış|tı|tığ))",
        ),
        ("earlier_session", MemoryPhrase, r"önceki (sohbet|konuşma|araştırma)"),
        ("that_research", Demonstrative, r"\b(o|şu) araştırma"),
        ("that_topic", Demonstrative, r"\b(o|şu) konu"),
        ("that_conversation", Demonstrative, r"\b(o|şu) (sohbet|görüşme|konuşma)"),
    ];
    specs
        .into_iter()
        .map(|(name, family, pattern)| RecallRule::new(name, family, pattern).unwrap())
        .collect()
}

/// Words and phrases removed from a recall question to form search terms.
/// Longer phrases come first so they are removed whole.
const RECALL_FILLERS: &[&str] = &[
    "hatırlıyor musun",
    "hatırlar mısın",
    "ne demiştik",
    "ne konuşmuştuk",
    "geçen sefer",
    "geçen hafta",
    "daha önce",
    "ile ilgili",
    "o araştırma",
    "şu araştırma",
    "o konu",
    "şu konu",
    "araştırmıştık",
    "araştırmıştım",
    "konuşmuştuk",
    "konuşmuştum",
    "sormuştum",
    "sormuştuk",
    "hakkında",
    "neydi",
    "hani",
    "bana",
    "tekrar",
    "söyler",
    "misin",
    "musun",
    "bir",
    "ne",
];

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    tier: i64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct TierRouter {
    brain: Arc<Brain>,
    config: RouterConfig,
    rules: Vec<RecallRule>,
    filler_pattern: Regex,
}

impl TierRouter {
    pub fn new(brain: Arc<Brain>, config: RouterConfig) -> Self {
        Self::with_rules(brain, config, default_recall_rules())
    }

    pub fn with_rules(brain: Arc<Brain>, config: RouterConfig, rules: Vec<RecallRule>) -> Self {
        let alternation = RECALL_FILLERS
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");
        let filler_pattern = Regex::new(&format!(r"\b(?:{alternation})\b")).unwrap();
        Self {
            brain,
            config,
            rules,
            filler_pattern,
        }
    }

    /// The first recall rule matching `text`, if any.
    pub fn detect_recall(&self, text: &str) -> Option<&RecallRule> {
        let lowered = turkish_lowercase(text);
        self.rules.iter().find(|rule| rule.matches(&lowered))
    }

    /// Strip recall filler words and punctuation from a question.
    pub fn extract_search_terms(&self, text: &str) -> String {
        let lowered = turkish_lowercase(text);
        let without_punct: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '-' { c } else { ' ' })
            .collect();
        let stripped = self.filler_pattern.replace_all(&without_punct, " ");
        collapse_whitespace(&stripped)
    }

    fn contains_trigger(&self, text: &str) -> bool {
        turkish_lowercase(text).contains(&turkish_lowercase(&self.config.trigger_keyword))
    }

    fn is_explicit_deep_request(&self, text: &str) -> bool {
        let lowered = turkish_lowercase(text);
        self.config
            .deep_research_phrases
            .iter()
            .any(|p| lowered.contains(&turkish_lowercase(p)))
    }

    /// Classify a question. Never fails.
    pub async fn classify(&self, question: &Question) -> RouterClassification {
        let explicit_deep_request = self.is_explicit_deep_request(&question.text);

        if let Some(rule) = self.detect_recall(&question.text) {
            let terms = self.extract_search_terms(&question.text);
            debug!(rule = rule.name, family = ?rule.family, terms = %terms, "Recall request detected");
            return RouterClassification {
                tier: Tier::Recall,
                reasoning: format!("recall pattern '{}' matched", rule.name),
                confidence: 1.0,
                explicit_deep_request,
                is_recall_request: true,
                search_terms: Some(if terms.is_empty() {
                    collapse_whitespace(&question.text)
                } else {
                    terms
                }),
            };
        }

        let prompt = self.build_prompt(question);
        let response = match self
            .brain
            .generate(
                &prompt,
                Some(ROUTER_SYSTEM_PROMPT),
                GenerationConfig::new(self.config.temperature, 256),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Classifier call failed; defaulting to tier 1");
                return Self::fallback(explicit_deep_request, format!("classifier call failed: {e}"));
            }
        };

        let Some(output) = parse_json_response::<ClassifierOutput>(&response) else {
            warn!("Classifier output could not be parsed; defaulting to tier 1");
            return Self::fallback(explicit_deep_request, "classifier output could not be parsed".into());
        };
        let tier = match output.tier {
            1 => Tier::Model,
            2 => Tier::Hybrid,
            3 => Tier::Deep,
            other => {
                warn!(tier = other, "Classifier returned an invalid tier; defaulting to tier 1");
                return Self::fallback(explicit_deep_request, format!("invalid tier {other}"));
            }
        };

        let mut reasoning = output.reasoning;
        let tier = self.apply_guardrails(tier, &question.text, &mut reasoning);
        RouterClassification {
            tier,
            reasoning,
            confidence: output.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            explicit_deep_request,
            is_recall_request: false,
            search_terms: None,
        }
    }

    fn apply_guardrails(&self, mut tier: Tier, text: &str, reasoning: &mut String) -> Tier {
        if tier == Tier::Deep && !self.config.deep_research_enabled {
            tier = Tier::Hybrid;
            reasoning.push_str(" [deep research disabled: tier 3 -> 2]");
        }
        if tier == Tier::Hybrid && !self.contains_trigger(text) {
            tier = Tier::Model;
            reasoning.push_str(&format!(
                " [no '{}' keyword: tier 2 -> 1]",
                self.config.trigger_keyword
            ));
        }
        tier
    }

    fn fallback(explicit_deep_request: bool, reasoning: String) -> RouterClassification {
        RouterClassification {
            tier: Tier::Model,
            reasoning,
            confidence: 0.5,
            explicit_deep_request,
            is_recall_request: false,
            search_terms: None,
        }
    }

    fn build_prompt(&self, question: &Question) -> String {
        let mut prompt = format!("Question: {}\n", escape_for_llm_prompt(&question.text, 2000));
        if let Some(profile) = question.profile.as_ref().and_then(|p| p.describe()) {
            prompt.push_str(&format!("User profile: {}\n", escape_for_llm_prompt(&profile, 500)));
        }
        if let Some(previous) = question.last_user_turn() {
            prompt.push_str(&format!(
                "Previous user message: {}\n",
                escape_for_llm_prompt(previous, 1000)
            ));
        }
        prompt.push_str(
            "\nTier 1: answer from model knowledge. Tier 2: search current evidence. \
             Tier 3: multi-round deep research.\n\
             Respond as JSON: {\"tier\": 1|2|3, \"reasoning\": \"...\", \"confidence\": 0.0-1.0}",
        );
        prompt
    }
}
