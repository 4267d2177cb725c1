//! Core type definitions for Evidra.
//!
//! Defines the LLM message/request shapes shared by every provider and the
//! read-only `Question` input that flows through the whole pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message sent to or received from an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: Option<usize>,
}

impl GenerationConfig {
    pub fn new(temperature: f32, max_output_tokens: usize) -> Self {
        Self {
            temperature,
            max_output_tokens: Some(max_output_tokens),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: None,
        }
    }
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: None,
            model: None,
        }
    }
}

/// A full response from the LLM.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Token usage statistics from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Diabetes-specific profile of the person asking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// e.g. "type1", "type2", "gestational".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diabetes_type: Option<String>,
    #[serde(default)]
    pub medications: Vec<String>,
}

impl UserProfile {
    /// One-line profile description for prompts, or `None` if the profile is empty.
    pub fn describe(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(kind) = &self.diabetes_type {
            parts.push(format!("Diabetes type: {kind}"));
        }
        if !self.medications.is_empty() {
            parts.push(format!("Medications: {}", self.medications.join(", ")));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The immutable input of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            profile: None,
            history: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    /// The most recent prior user turn, if any.
    pub fn last_user_turn(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Merhaba");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Merhaba");
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        assert_eq!(total.total(), 165);
    }

    #[test]
    fn test_profile_describe() {
        assert_eq!(UserProfile::default().describe(), None);
        let profile = UserProfile {
            diabetes_type: Some("type2".into()),
            medications: vec!["metformin".into(), "insulin glargine".into()],
        };
        assert_eq!(
            profile.describe().as_deref(),
            Some("Diabetes type: type2; Medications: metformin, insulin glargine")
        );
    }

    #[test]
    fn test_last_user_turn() {
        let question = Question::new("Peki dozaj?").with_history(vec![
            ConversationTurn::user("Metformin nedir?"),
            ConversationTurn::assistant("Metformin bir biguaniddir."),
        ]);
        assert_eq!(question.last_user_turn(), Some("Metformin nedir?"));
        assert_eq!(Question::new("x").last_user_turn(), None);
    }

    #[test]
    fn test_question_deserializes_without_optional_fields() {
        let question: Question = serde_json::from_str(r#"{"text": "HbA1c nedir?"}"#).unwrap();
        assert_eq!(question.text, "HbA1c nedir?");
        assert!(question.profile.is_none());
        assert!(question.history.is_empty());
    }
}
