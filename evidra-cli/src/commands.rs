//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use evidra_core::config::{
    EngineConfig, config_exists, load_config, workspace_config_path, write_default_config,
};
use evidra_core::recall::RecallOutcome;
use evidra_core::research::{EngineOutcome, ResearchEngine, ResearchEvent};
use evidra_core::{InMemorySessionStore, Question};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    model: Option<&str>,
) -> anyhow::Result<()> {
    match command {
        Commands::Classify { question } => {
            let config = load(workspace, model)?;
            handle_classify(&question, &config).await
        }
        Commands::Research {
            question,
            sessions,
            json,
        } => {
            let config = load(workspace, model)?;
            handle_research(&question, &config, sessions.as_deref(), json).await
        }
        Commands::Serve { port, sessions } => {
            let config = load(workspace, model)?;
            let engine = build_engine(&config, sessions.as_deref())?;
            let port = port.unwrap_or(config.server.port);
            crate::server::run(Arc::new(engine), &config.server.host, port).await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path, model: Option<&str>) -> anyhow::Result<EngineConfig> {
    if !config_exists(Some(workspace)) {
        tracing::info!("No configuration file found; using defaults (run `evidra config init`)");
    }
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = model {
        config.llm.model = model.to_string();
    }
    Ok(config)
}

fn build_engine(config: &EngineConfig, sessions: Option<&Path>) -> anyhow::Result<ResearchEngine> {
    let mut engine = ResearchEngine::from_config(config)?;
    if let Some(path) = sessions {
        let store = InMemorySessionStore::from_json_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load sessions from {}: {}", path.display(), e))?;
        tracing::info!(sessions = store.len(), "Session store loaded");
        engine = engine.with_session_store(Arc::new(store));
    }
    Ok(engine)
}

async fn handle_classify(question: &str, config: &EngineConfig) -> anyhow::Result<()> {
    let engine = ResearchEngine::from_config(config)?;
    let classification = engine.classify(&Question::new(question)).await;
    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

async fn handle_research(
    question: &str,
    config: &EngineConfig,
    sessions: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(config, sessions)?);
    let question = Question::new(question);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ResearchEvent>();

    let run = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(&question, &tx, &cancel).await })
    };

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling after the current round...");
            ctrl_c.cancel();
        }
    });

    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else if let Some(line) = describe_event(&event) {
            println!("{line}");
        }
    }

    let outcome = run.await??;
    if !json {
        print_outcome(&outcome);
    }
    let usage = engine.brain().total_usage();
    tracing::info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "LLM usage"
    );
    Ok(())
}

/// One human-readable line per event; sampled and noisy events are skipped.
pub(crate) fn describe_event(event: &ResearchEvent) -> Option<String> {
    let line = match event {
        ResearchEvent::Classified { classification } => format!(
            "Tier {} (confidence {:.2}): {}",
            classification.tier, classification.confidence, classification.reasoning
        ),
        ResearchEvent::RecallComplete { .. } => "Recall complete".to_string(),
        ResearchEvent::PlanningStarted => "Planning research...".to_string(),
        ResearchEvent::PlanningComplete { plan } => format!(
            "Plan: {} strategy, {} round(s), focus: {}",
            plan.strategy,
            plan.estimated_rounds,
            plan.focus_areas.join(", ")
        ),
        ResearchEvent::RoundStarted {
            round,
            query,
            estimated_sources,
        } => format!("Round {round}: \"{query}\" (up to {estimated_sources} sources)"),
        ResearchEvent::ApiCompleted {
            api,
            count,
            duration_ms,
            success,
        } => {
            if *success {
                format!("  {api}: {count} record(s) in {duration_ms}ms")
            } else {
                format!("  {api}: failed after {duration_ms}ms")
            }
        }
        ResearchEvent::RoundComplete {
            round,
            source_count,
            duration_ms,
            status,
            ..
        } => format!("Round {round} {status:?}: {source_count} new source(s) in {duration_ms}ms"),
        ResearchEvent::ReflectionComplete { reflection, .. } => format!(
            "  Evidence {}; gaps: {}",
            reflection.evidence_quality,
            if reflection.gaps_identified.is_empty() {
                "none".to_string()
            } else {
                reflection.gaps_identified.join("; ")
            }
        ),
        ResearchEvent::SourceSelectionStarted => "Ranking and selecting sources...".to_string(),
        ResearchEvent::SynthesisPreparation {
            selected_count,
            total_tokens,
        } => format!("Selected {selected_count} source(s), ~{total_tokens} tokens"),
        ResearchEvent::Error { message } => format!("Error: {message}"),
        ResearchEvent::ApiStarted { .. }
        | ResearchEvent::SourceFound { .. }
        | ResearchEvent::ReflectionStarted { .. } => return None,
    };
    Some(line)
}

fn print_outcome(outcome: &EngineOutcome) {
    match outcome {
        EngineOutcome::ModelOnly { .. } => {
            println!("\nNo research needed; answer from model knowledge.");
        }
        EngineOutcome::Recall { outcome, .. } => match outcome {
            RecallOutcome::NoMatch { suggestion } => println!("\n{suggestion}"),
            RecallOutcome::MultipleMatches { candidates, prompt } => {
                println!("\n{prompt}");
                for c in candidates {
                    println!("  [{}] {} ({}) - {}", c.id, c.title, c.date, c.summary);
                }
            }
            RecallOutcome::Answer { answer, session } => {
                println!("\n{answer}\n\n  Source: {} ({})", session.title, session.date);
            }
        },
        EngineOutcome::Research { report, .. } => {
            println!("\nStopped: {}", report.orchestration.stop_reason);
            for (i, source) in report.selection.selected_sources.iter().enumerate() {
                println!(
                    "  {:>2}. [{:>3.0}] {} <{}>",
                    i + 1,
                    source.relevance_score,
                    source.record.title(),
                    source.record.url()
                );
            }
        }
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() && !force {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = write_default_config(workspace, force)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidra_core::research::{ProviderKind, RoundStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn mock_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".evidra");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[llm]\nprovider = \"mock\"\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init { force: false },
        };
        handle_command(command, dir.path(), None).await.unwrap();

        let config_path = dir.path().join(".evidra").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: EngineConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.llm.model, "gpt-4o");
        assert_eq!(parsed.research.max_rounds, 4);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = mock_workspace();
        let config_path = dir.path().join(".evidra").join("config.toml");
        let before = std::fs::read_to_string(&config_path).unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init { force: false },
        };
        handle_command(command, dir.path(), None).await.unwrap();
        assert_eq!(before, std::fs::read_to_string(&config_path).unwrap());

        let command = Commands::Config {
            action: ConfigAction::Init { force: true },
        };
        handle_command(command, dir.path(), None).await.unwrap();
        assert_ne!(before, std::fs::read_to_string(&config_path).unwrap());
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_classify_with_mock_provider() {
        let dir = mock_workspace();
        let command = Commands::Classify {
            question: "Geçen sefer ne konuşmuştuk?".into(),
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_research_recall_with_session_file() {
        let dir = mock_workspace();
        let sessions = dir.path().join("sessions.json");
        std::fs::write(&sessions, "[]").unwrap();
        let command = Commands::Research {
            question: "Hatırlıyor musun, o araştırma neydi?".into(),
            sessions: Some(sessions),
            json: true,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_research_with_missing_session_file_fails() {
        let dir = mock_workspace();
        let command = Commands::Research {
            question: "q".into(),
            sessions: Some(dir.path().join("missing.json")),
            json: false,
        };
        assert!(handle_command(command, dir.path(), None).await.is_err());
    }

    #[test]
    fn test_describe_event() {
        let line = describe_event(&ResearchEvent::ApiCompleted {
            api: ProviderKind::Trials,
            count: 0,
            duration_ms: 8000,
            success: false,
        })
        .unwrap();
        assert_eq!(line, "  clinical_trials: failed after 8000ms");

        let line = describe_event(&ResearchEvent::RoundComplete {
            round: 2,
            source_count: 11,
            duration_ms: 950,
            sources: Vec::new(),
            status: RoundStatus::Partial,
        })
        .unwrap();
        assert_eq!(line, "Round 2 Partial: 11 new source(s) in 950ms");

        assert!(
            describe_event(&ResearchEvent::SourceFound {
                title: "t".into(),
                source_type: ProviderKind::Web,
            })
            .is_none()
        );
    }
}
