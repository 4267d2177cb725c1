//! Recall: answers a question from a matched past session instead of
//! running new research.
//!
//! The handler never searches; it is given the store's matches. No matches
//! means no answer. Two matches scoring too close together are ambiguous and
//! handed back to the user as candidates. Otherwise the top session's full
//! transcript is the only material the model may answer from.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::brain::Brain;
use crate::config::RecallConfig;
use crate::error::{EvidraError, ResearchError};
use crate::sanitize::{escape_for_llm_prompt, word_tokens};
use crate::types::{ConversationTurn, GenerationConfig, Question, Role};

const RECALL_SYSTEM_PROMPT: &str = "You answer questions about a past conversation. \
Use only the transcript you are given. If the transcript does not contain the answer, say so. \
Always mention the date of the conversation.";

const NO_MATCH_SUGGESTION: &str = "Bu konuyla ilgili geçmiş bir araştırma bulamadım. \
İstersen yeni bir araştırma başlatabilirim.";

const DISAMBIGUATION_PROMPT: &str = "Birden fazla geçmiş oturum bulundu. \
Hangisini kastettiğini seçer misin?";

/// Scores are compared at this precision so a gap equal to the threshold is
/// not read as smaller than it.
const SCORE_EPSILON: f64 = 1e-9;

const TURKISH_MONTHS: [&str; 12] = [
    "Ocak", "Şubat", "Mart", "Nisan", "Mayıs", "Haziran", "Temmuz", "Ağustos", "Eylül", "Ekim",
    "Kasım", "Aralık",
];

/// A past session returned by the session store for a recall query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMatch {
    pub session_id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    /// ISO-8601 timestamp.
    pub created_at: String,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    /// 0.0–1.0, assigned by the store.
    #[serde(default)]
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCandidate {
    pub id: String,
    pub title: String,
    pub date: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReference {
    pub id: String,
    pub title: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecallOutcome {
    NoMatch {
        suggestion: String,
    },
    MultipleMatches {
        candidates: Vec<SessionCandidate>,
        prompt: String,
    },
    Answer {
        answer: String,
        session: SessionReference,
    },
}

/// Format an ISO-8601 timestamp as "14 Ekim 2026".
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]` timestamp, or a bare
/// date. Anything else is returned unchanged.
pub fn format_session_date(iso: &str) -> String {
    let trimmed = iso.trim();
    let date = DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"));
    match date {
        Ok(date) => format!(
            "{} {} {}",
            date.day(),
            TURKISH_MONTHS[date.month0() as usize],
            date.year()
        ),
        Err(_) => iso.to_string(),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "Kullanıcı",
        Role::Assistant => "Asistan",
        Role::System => "Sistem",
    }
}

pub struct RecallHandler {
    brain: Arc<Brain>,
    config: RecallConfig,
}

impl RecallHandler {
    pub fn new(brain: Arc<Brain>, config: RecallConfig) -> Self {
        Self { brain, config }
    }

    pub async fn recall(
        &self,
        question: &Question,
        mut matches: Vec<SessionMatch>,
    ) -> Result<RecallOutcome, ResearchError> {
        if matches.is_empty() {
            info!("No past session matched the recall request");
            return Ok(RecallOutcome::NoMatch {
                suggestion: NO_MATCH_SUGGESTION.to_string(),
            });
        }

        matches.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        if let [first, second, ..] = matches.as_slice()
            && first.relevance_score - second.relevance_score
                < self.config.ambiguity_gap - SCORE_EPSILON
        {
            debug!(
                top = first.relevance_score,
                second = second.relevance_score,
                gap = self.config.ambiguity_gap,
                "Recall matches are ambiguous"
            );
            let candidates = matches
                .iter()
                .take(self.config.max_candidates)
                .map(|m| SessionCandidate {
                    id: m.session_id.clone(),
                    title: m.title.clone(),
                    date: format_session_date(&m.created_at),
                    summary: m.summary.clone(),
                })
                .collect();
            return Ok(RecallOutcome::MultipleMatches {
                candidates,
                prompt: DISAMBIGUATION_PROMPT.to_string(),
            });
        }

        let session = &matches[0];
        let date = format_session_date(&session.created_at);
        let prompt = build_prompt(&question.text, session, &date);
        let answer = self
            .brain
            .generate(
                &prompt,
                Some(RECALL_SYSTEM_PROMPT),
                GenerationConfig::new(self.config.temperature, self.config.max_output_tokens),
            )
            .await
            .map_err(ResearchError::Recall)?;

        info!(session_id = %session.session_id, "Answered from past session");
        Ok(RecallOutcome::Answer {
            answer: answer.trim().to_string(),
            session: SessionReference {
                id: session.session_id.clone(),
                title: session.title.clone(),
                date,
            },
        })
    }
}

fn build_prompt(question: &str, session: &SessionMatch, date: &str) -> String {
    let mut prompt = format!(
        "Session: {}\nDate: {date}\n\nTranscript:\n",
        escape_for_llm_prompt(&session.title, 300)
    );
    for turn in &session.conversation_history {
        prompt.push_str(&format!(
            "{}: {}\n",
            role_label(turn.role),
            escape_for_llm_prompt(&turn.content, 4000)
        ));
    }
    prompt.push_str(&format!(
        "\nCurrent question: {}\nAnswer only from the transcript above and state its date ({date}).",
        escape_for_llm_prompt(question, 2000)
    ));
    prompt
}

/// Lookup of past sessions for recall requests.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Sessions relevant to `terms`, each with a relevance score in 0.0–1.0.
    async fn search(&self, terms: &str) -> Result<Vec<SessionMatch>, EvidraError>;
}

/// Session store over an in-memory list, scored by term overlap.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Vec<SessionMatch>,
    limit: usize,
}

impl InMemorySessionStore {
    pub fn new(sessions: Vec<SessionMatch>) -> Self {
        Self {
            sessions,
            limit: 10,
        }
    }

    /// Load sessions from a JSON array file.
    pub fn from_json_file(path: &Path) -> Result<Self, EvidraError> {
        let content = std::fs::read_to_string(path)?;
        let sessions: Vec<SessionMatch> = serde_json::from_str(&content)?;
        debug!(path = %path.display(), sessions = sessions.len(), "Loaded session store");
        Ok(Self::new(sessions))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fraction of query terms present in the session's title, summary, or topics.
    fn score(query_terms: &HashSet<String>, session: &SessionMatch) -> f64 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let text = format!(
            "{} {} {}",
            session.title,
            session.summary,
            session.key_topics.join(" ")
        );
        let doc_terms = word_tokens(&text, 3);
        let hits = query_terms
            .iter()
            .filter(|q| doc_terms.iter().any(|d| terms_match(q, d)))
            .count();
        hits as f64 / query_terms.len() as f64
    }
}

/// Equal, or one is a prefix of the other with at least 4 chars in common
/// ("metformini" matches "metformin").
fn terms_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= 4 && long.starts_with(short)
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn search(&self, terms: &str) -> Result<Vec<SessionMatch>, EvidraError> {
        let query_terms: HashSet<String> = word_tokens(terms, 3).into_iter().collect();
        let mut matches: Vec<SessionMatch> = self
            .sessions
            .iter()
            .filter_map(|session| {
                let score = Self::score(&query_terms, session);
                (score > 0.0).then(|| SessionMatch {
                    relevance_score: score,
                    ..session.clone()
                })
            })
            .collect();
        matches.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        matches.truncate(self.limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use pretty_assertions::assert_eq;

    fn session(id: &str, score: f64) -> SessionMatch {
        SessionMatch {
            session_id: id.into(),
            title: format!("Session {id}"),
            summary: "Metformin ve B12".into(),
            key_topics: vec!["metformin".into()],
            created_at: "2026-10-14T09:30:00Z".into(),
            conversation_history: vec![
                ConversationTurn::user("Metformin B12 eksikliği yapar mı?"),
                ConversationTurn::assistant("Uzun süreli kullanımda B12 düzeyi düşebilir."),
            ],
            relevance_score: score,
        }
    }

    fn handler(mock: Arc<MockLlmProvider>) -> RecallHandler {
        RecallHandler::new(Arc::new(Brain::new(mock)), RecallConfig::default())
    }

    #[tokio::test]
    async fn test_no_matches_makes_no_call() {
        let mock = Arc::new(MockLlmProvider::new());
        let outcome = handler(mock.clone())
            .recall(&Question::new("hatırlıyor musun"), Vec::new())
            .await
            .unwrap();
        assert!(matches!(outcome, RecallOutcome::NoMatch { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_close_scores_are_ambiguous() {
        let mock = Arc::new(MockLlmProvider::new());
        let outcome = handler(mock.clone())
            .recall(&Question::new("q"), vec![session("b", 0.80), session("a", 0.91)])
            .await
            .unwrap();
        match outcome {
            RecallOutcome::MultipleMatches { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].id, "a");
                assert_eq!(candidates[0].date, "14 Ekim 2026");
            }
            other => panic!("expected multiple matches, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_gap_equal_to_threshold_is_answered() {
        let mock = Arc::new(MockLlmProvider::with_responses(["Metformin konuşmuştuk."]));
        let outcome = handler(mock.clone())
            .recall(&Question::new("q"), vec![session("b", 0.80), session("a", 0.95)])
            .await
            .unwrap();
        match outcome {
            RecallOutcome::Answer { session, .. } => assert_eq!(session.id, "a"),
            other => panic!("expected an answer, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_candidates_capped() {
        let mock = Arc::new(MockLlmProvider::new());
        let matches = (0..8).map(|i| session(&i.to_string(), 0.5)).collect();
        let outcome = handler(mock).recall(&Question::new("q"), matches).await.unwrap();
        let RecallOutcome::MultipleMatches { candidates, .. } = outcome else {
            panic!("expected multiple matches");
        };
        assert_eq!(candidates.len(), 5);
    }

    #[tokio::test]
    async fn test_clear_winner_is_answered_from_transcript() {
        let mock = Arc::new(MockLlmProvider::with_responses([
            "  14 Ekim 2026 tarihli konuşmada B12 düzeyinin düşebileceğini konuştuk. ",
        ]));
        let outcome = handler(mock.clone())
            .recall(
                &Question::new("Metformin konusunu hatırlıyor musun?"),
                vec![session("low", 0.40), session("top", 0.90)],
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RecallOutcome::Answer {
                answer: "14 Ekim 2026 tarihli konuşmada B12 düzeyinin düşebileceğini konuştuk.".into(),
                session: SessionReference {
                    id: "top".into(),
                    title: "Session top".into(),
                    date: "14 Ekim 2026".into(),
                },
            }
        );
        let prompt = mock.last_prompt().unwrap();
        assert!(prompt.contains("Kullanıcı: Metformin B12 eksikliği yapar mı?"));
        assert!(prompt.contains("Asistan: Uzun süreli"));
        let request = &mock.requests()[0];
        assert!((request.temperature - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_single_match_is_answered() {
        let mock = Arc::new(MockLlmProvider::with_responses(["cevap"]));
        let outcome = handler(mock.clone())
            .recall(&Question::new("q"), vec![session("only", 0.3)])
            .await
            .unwrap();
        assert!(matches!(outcome, RecallOutcome::Answer { .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_is_propagated() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_error(LlmError::Connection {
            message: "refused".into(),
        });
        let result = handler(mock).recall(&Question::new("q"), vec![session("x", 0.9)]).await;
        assert!(matches!(result, Err(ResearchError::Recall(_))));
    }

    #[test]
    fn test_format_session_date() {
        assert_eq!(format_session_date("2026-10-14T09:30:00Z"), "14 Ekim 2026");
        assert_eq!(format_session_date("2025-02-01T23:10:00+03:00"), "1 Şubat 2025");
        assert_eq!(format_session_date("2024-12-31T08:00:00.123"), "31 Aralık 2024");
        assert_eq!(format_session_date("2024-06-05"), "5 Haziran 2024");
        assert_eq!(format_session_date("dün"), "dün");
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(RecallOutcome::NoMatch {
            suggestion: "s".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "no_match");
    }

    #[tokio::test]
    async fn test_in_memory_store_scores_by_overlap() {
        let mut insulin = session("insulin", 0.0);
        insulin.title = "İnsülin pompası".into();
        insulin.summary = "Pompa ayarları".into();
        insulin.key_topics = vec!["insülin".into()];
        let store = InMemorySessionStore::new(vec![insulin, session("metformin", 0.0)]);

        let results = store.search("metformini b12").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, "metformin");
        assert_eq!(results[0].relevance_score, 1.0);

        assert!(store.search("tiroid").await.unwrap().is_empty());
    }

    #[test]
    fn test_store_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let json = serde_json::to_string(&vec![session("a", 0.0)]).unwrap();
        std::fs::write(&path, json).unwrap();
        let store = InMemorySessionStore::from_json_file(&path).unwrap();
        assert_eq!(store.len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(InMemorySessionStore::from_json_file(&path).is_err());
    }
}
