//! Offline diagnosis CLI: inspect how a question is analyzed, which schema
//! is retrieved and what prompt is built, or run it end to end.

use anyhow::{Context, Result};
use bi_query_engine::api::{AppState, Backends};
use bi_query_engine::context::BusinessContextAnalyzer;
use bi_query_engine::pipeline::QueryRequest;
use bi_query_engine::prompt::PromptBuilder;
use bi_query_engine::schema_rag::BusinessMetadataRetriever;
use bi_query_engine::{db, logging, AppConfig, Metadata};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bi-query")]
#[command(about = "Business-context-aware NL-to-SQL query engine")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to metadata directory (overrides metadata.dir)
    #[arg(short, long, global = true)]
    metadata_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the business context profile for a question
    Analyze { question: String },
    /// Show the retrieved schema and the prompt that would be sent
    Prompt {
        question: String,
        /// Prompt token budget
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Generate and execute SQL for a question
    Ask {
        question: String,
        #[arg(long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = args.metadata_dir {
        config.metadata.dir = dir;
    }
    logging::init("warn", false)?;

    let metadata = Arc::new(
        Metadata::load(&config.metadata.dir)
            .with_context(|| format!("loading metadata from {}", config.metadata.dir.display()))?,
    );

    match args.command {
        Command::Analyze { question } => {
            let analyzer = BusinessContextAnalyzer::new(metadata);
            let profile = analyzer.analyze(&question, "cli", None);
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Prompt { question, max_tokens } => {
            let analyzer = BusinessContextAnalyzer::new(metadata.clone());
            let retriever = BusinessMetadataRetriever::new(metadata, config.retrieval.clone());
            let builder = PromptBuilder::new(config.prompt.clone());

            let profile = analyzer.analyze(&question, "cli", None);
            let schema = retriever.retrieve(&profile);
            let prompt = builder.build_with_budget(
                &profile,
                &schema,
                max_tokens.unwrap_or(config.prompt.max_tokens),
            );

            println!("=== Tables ===");
            for table in &schema.tables {
                println!(
                    "{:<20} relevance={:.3}{}",
                    table.name,
                    table.relevance,
                    if table.is_bridge { " (bridge)" } else { "" }
                );
            }
            for path in &schema.join_paths {
                println!("join: {}", path.describe());
            }
            println!("\n=== Prompt ({} tokens) ===", prompt.details.token_count);
            println!("{}", prompt.text);
        }
        Command::Ask { question, user } => {
            let pool = match config.database.url {
                Some(_) => Some(db::init_pool(&config.database).await?),
                None => None,
            };
            let backends = Backends::from_config(&config, pool)?;
            let state = AppState::new(config, metadata, backends);
            let response = state.service.handle(QueryRequest::new(question, user)).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
