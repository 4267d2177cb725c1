//! # Evidra Core
//!
//! Core library for Evidra, an adaptive multi-round research engine for
//! evidence-backed diabetes answers. Provides the tier router, the recall
//! path over past sessions, the research round loop, ranking and selection,
//! the LLM interface (brain), provider adapters and configuration.

pub mod brain;
pub mod config;
pub mod error;
pub mod providers;
pub mod recall;
pub mod research;
pub mod router;
pub mod sanitize;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider, TokenCounter};
pub use config::EngineConfig;
pub use error::{EvidraError, Result};
pub use providers::EvidenceProvider;
pub use recall::{InMemorySessionStore, RecallHandler, RecallOutcome, SessionMatch, SessionStore};
pub use research::{EngineOutcome, EventSink, ResearchEngine, ResearchEvent};
pub use router::{RouterClassification, Tier, TierRouter};
pub use types::{ConversationTurn, Message, Question, Role, UserProfile};
