//! Configuration system for Evidra.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/evidra/config.toml` and/or `.evidra/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for the research engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub ranking: RankingConfig,
    pub selection: SelectionConfig,
    pub router: RouterConfig,
    pub recall: RecallConfig,
    pub providers: ProvidersConfig,
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.max_rounds == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_rounds must be at least 1".into(),
            });
        }
        if self.selection.base_limit > self.selection.extended_limit {
            return Err(ConfigError::Invalid {
                message: format!(
                    "selection.base_limit ({}) exceeds selection.extended_limit ({})",
                    self.selection.base_limit, self.selection.extended_limit
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.selection.extension_ratio) {
            return Err(ConfigError::Invalid {
                message: "selection.extension_ratio must be within 0.0..=1.0".into(),
            });
        }
        if self.ranking.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "ranking.batch_size must be at least 1".into(),
            });
        }
        if self.router.trigger_keyword.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "router.trigger_keyword must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Configuration for the LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai", "openrouter", "local", "mock".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Context window size for the model.
    pub context_window: usize,
    /// Retries for transient provider errors.
    pub max_retries: usize,
    /// HTTP timeout per completion request.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            context_window: 128_000,
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

/// Round loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Hard cap on rounds, regardless of the plan's estimate.
    pub max_rounds: usize,
    /// Primary (web) provider budget in round 1.
    pub first_round_primary: usize,
    /// Budget shared by the three other providers in round 1.
    pub first_round_others: usize,
    /// Primary provider budget in rounds 2 and later.
    pub later_round_primary: usize,
    /// Budget shared by the other providers in rounds 2 and later.
    pub later_round_others: usize,
    /// Per-provider call timeout.
    pub provider_timeout_ms: u64,
    /// How many `source_found` events to emit per provider per round.
    pub source_samples_per_provider: usize,
    /// Stop when a round yields fewer new sources than this fraction of the previous one.
    /// `0.0` disables the check.
    pub diminishing_returns_ratio: f64,
    pub planner_temperature: f32,
    pub reflector_temperature: f32,
    pub refiner_temperature: f32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            first_round_primary: 10,
            first_round_others: 15,
            later_round_primary: 5,
            later_round_others: 10,
            provider_timeout_ms: 8_000,
            source_samples_per_provider: 3,
            diminishing_returns_ratio: 0.2,
            planner_temperature: 0.3,
            reflector_temperature: 0.3,
            refiner_temperature: 0.4,
        }
    }
}

/// Relevance ranking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Sources scored per LLM call.
    pub batch_size: usize,
    /// Maximum number of ranked sources returned.
    pub top_n: usize,
    /// Size of the `top_sources` preview.
    pub top_k: usize,
    pub temperature: f32,
    /// Characters of snippet/abstract shown to the scorer per source.
    pub snippet_chars: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            batch_size: 40,
            top_n: 30,
            top_k: 10,
            temperature: 0.1,
            snippet_chars: 300,
        }
    }
}

/// Final source selection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub base_limit: usize,
    pub extended_limit: usize,
    /// Score at or above which a source counts as high quality.
    pub high_quality_threshold: f64,
    /// Fraction of the base window that must be high quality to extend the window.
    pub extension_ratio: f64,
    pub token_budget: usize,
    pub min_relevance_score: f64,
    pub semantic_similarity_threshold: f64,
    pub enable_semantic_dedup: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            base_limit: 20,
            extended_limit: 30,
            high_quality_threshold: 70.0,
            extension_ratio: 0.5,
            token_budget: 16_800,
            min_relevance_score: 40.0,
            semantic_similarity_threshold: 0.85,
            enable_semantic_dedup: true,
        }
    }
}

/// Tier router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// When false, a tier-3 classification is downgraded to tier 2.
    pub deep_research_enabled: bool,
    /// Literal keyword that must appear in the question for tier 2 to stand.
    pub trigger_keyword: String,
    /// Phrases marking an explicit request for deep research.
    pub deep_research_phrases: Vec<String>,
    pub temperature: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            deep_research_enabled: false,
            trigger_keyword: "araştır".to_string(),
            deep_research_phrases: vec!["derinlemesine".to_string(), "detaylı araştır".to_string()],
            temperature: 0.1,
        }
    }
}

/// Recall handler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Top-two score gap below which matches are considered ambiguous.
    pub ambiguity_gap: f64,
    pub max_candidates: usize,
    pub temperature: f32,
    pub max_output_tokens: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            ambiguity_gap: 0.15,
            max_candidates: 5,
            temperature: 0.2,
            max_output_tokens: 1024,
        }
    }
}

/// One HTTP evidence gateway endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: String,
    /// Environment variable holding a bearer token, if the gateway needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Evidence provider endpoints. A missing endpoint disables that provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<EndpointConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<EndpointConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprint: Option<EndpointConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trials: Option<EndpointConfig>,
}

/// HTTP server configuration for `evidra serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "evidra", "evidra")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".evidra").join("config.toml")
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (EVIDRA_LLM__MODEL, EVIDRA_RESEARCH__MAX_ROUNDS, etc.)
    figment = figment.merge(Env::prefixed("EVIDRA_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any Evidra configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration as TOML into `<workspace>/.evidra/config.toml`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_default_config(workspace: &Path, force: bool) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() && !force {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let body = toml::to_string_pretty(&EngineConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid {
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    std::fs::write(&path, body).map_err(|e| ConfigError::Invalid {
        message: format!("cannot write {}: {e}", path.display()),
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.research.max_rounds, 4);
        assert_eq!(config.research.first_round_primary + config.research.first_round_others, 25);
        assert_eq!(config.research.later_round_primary + config.research.later_round_others, 15);
        assert_eq!(config.selection.token_budget, 16_800);
        assert_eq!(config.ranking.top_n, 30);
        assert!(!config.router.deep_research_enabled);
        assert_eq!(config.router.trigger_keyword, "araştır");
        assert!((config.recall.ambiguity_gap - 0.15).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.selection.base_limit, 20);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = EngineConfig::default();
        overrides.llm.model = "gpt-4o-mini".to_string();
        overrides.research.max_rounds = 2;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.research.max_rounds, 2);
    }

    #[test]
    fn test_load_config_from_workspace_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let evidra_dir = dir.path().join(".evidra");
        std::fs::create_dir_all(&evidra_dir).unwrap();
        std::fs::write(
            evidra_dir.join("config.toml"),
            r#"
[router]
deep_research_enabled = true

[selection]
token_budget = 8000

[providers.web]
endpoint = "http://localhost:9000/web"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert!(config.router.deep_research_enabled);
        assert_eq!(config.router.trigger_keyword, "araştır");
        assert_eq!(config.selection.token_budget, 8000);
        assert_eq!(config.selection.base_limit, 20);
        assert_eq!(
            config.providers.web.map(|w| w.endpoint).as_deref(),
            Some("http://localhost:9000/web")
        );
        assert!(config.providers.trials.is_none());
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_write_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_default_config(dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(write_default_config(dir.path(), false).is_err());
        assert!(write_default_config(dir.path(), true).is_ok());

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut config = EngineConfig::default();
        config.selection.base_limit = 40;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_limit"));

        let mut config = EngineConfig::default();
        config.research.max_rounds = 0;
        assert!(config.validate().is_err());
    }
}
