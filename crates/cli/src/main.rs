//! railmind command-line entry point.
//!
//! Usage:
//!   railmind run "Train 12627 delayed by 45 minutes at Katpadi" --context '{"affected_passengers": 850}'
//!   railmind retrieve "refund for cancelled train" --category refund-rules -k 3
//!   railmind check-config --config railmind.toml
//!
//! # Environment Variables
//!
//! - `RAILMIND_CONFIG` - Path to the TOML configuration file
//! - `GROQ_API_KEY` / `OPENAI_API_KEY` - Provider API key
//! - `RUST_LOG` - Log filter (default: info,railmind_coordinator=debug)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use railmind_coordinator::{CancellationToken, CoordinatorConfig, Orchestrator};
use railmind_knowledge::{Category, KnowledgeBase};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Railway multi-agent orchestrator
#[derive(Parser)]
#[command(name = "railmind")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "RAILMIND_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a request through the agents and print the outcome as JSON
    Run {
        /// The natural-language request
        request: String,

        /// Context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,

        /// Read the context from a JSON file instead
        #[arg(long, value_name = "FILE", conflicts_with = "context")]
        context_file: Option<PathBuf>,
    },

    /// Query the knowledge base directly
    Retrieve {
        query: String,

        /// Number of passages to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict to one category (timetables, policies, refund-rules, route-maps)
        #[arg(long)]
        category: Option<String>,
    },

    /// Validate the configuration and report what the knowledge base loads
    CheckConfig,
}

fn load_config(path: Option<&Path>) -> Result<CoordinatorConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            CoordinatorConfig::from_file(path)
        }
        None => {
            info!("Using default configuration");
            Ok(CoordinatorConfig::default())
        }
    }
}

fn parse_context(inline: Option<String>, file: Option<PathBuf>) -> Result<Map<String, Value>> {
    let raw = match (inline, file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading context file '{}'", path.display()))?,
        (None, None) => return Ok(Map::new()),
    };
    match serde_json::from_str(&raw).context("parsing context JSON")? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("context must be a JSON object"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,railmind_coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            request,
            context,
            context_file,
        } => {
            let context = parse_context(context, context_file)?;
            let (orchestrator, _) = Orchestrator::from_config(&config).await?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling outstanding agent calls");
                    on_interrupt.cancel();
                }
            });

            let outcome = orchestrator.run_with_cancel(&request, context, cancel).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Retrieve {
            query,
            top_k,
            category,
        } => {
            let category = category
                .map(|c| c.parse::<Category>())
                .transpose()?;
            let (knowledge, report) = KnowledgeBase::from_config(&config.knowledge).await?;
            info!(passages = report.total_passages(), "Knowledge base loaded");

            let k = top_k.unwrap_or(config.knowledge.default_top_k);
            let result = knowledge.retrieve(&query, k, category).await?;
            let hits: Vec<Value> = result
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "id": hit.document.id.to_string(),
                        "score": hit.score,
                        "text": hit.document.text,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::CheckConfig => {
            config.validate()?;
            let (_, report) = KnowledgeBase::from_config(&config.knowledge).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "llm": {
                        "provider": config.llm.provider,
                        "model": config.llm.model,
                        "base_url": config.llm.base_url(),
                        "api_key_present": config.llm.resolve_api_key().is_some(),
                    },
                    "graph": config.graph,
                    "knowledge": report,
                }))?
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_context() {
        let cli = Cli::parse_from([
            "railmind",
            "run",
            "Train 12627 delayed",
            "--context",
            r#"{"delay_minutes": 45}"#,
        ]);
        let Commands::Run { request, context, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(request, "Train 12627 delayed");
        let map = parse_context(context, None).unwrap();
        assert_eq!(map["delay_minutes"], 45);
    }

    #[test]
    fn context_must_be_an_object() {
        assert!(parse_context(Some("[1, 2]".to_string()), None).is_err());
        assert!(parse_context(None, None).unwrap().is_empty());
    }

    #[test]
    fn retrieve_accepts_category_and_k() {
        let cli = Cli::parse_from(["railmind", "retrieve", "refund", "-k", "3", "--category", "refund-rules"]);
        let Commands::Retrieve { top_k, category, .. } = cli.command else {
            panic!("expected retrieve");
        };
        assert_eq!(top_k, Some(3));
        assert_eq!(category.as_deref(), Some("refund-rules"));
    }
}
