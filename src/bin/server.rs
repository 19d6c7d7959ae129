//! HTTP server for the BI query engine.

use anyhow::{Context, Result};
use bi_query_engine::api::{self, AppState, Backends};
use bi_query_engine::db::{self, MetadataRepository};
use bi_query_engine::{jobs, logging, AppConfig, Metadata};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bi-server")]
#[command(about = "Business-context-aware NL-to-SQL query service")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override server.bind_addr
    #[arg(short, long)]
    bind: Option<String>,

    /// Override server.log_level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    let prefer_level = args.log_level.is_some();
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    logging::init(&config.server.log_level, prefer_level)?;

    let pool = match config.database.url {
        Some(_) => Some(db::init_pool(&config.database).await.context("connecting to database")?),
        None => {
            warn!("database.url not set; queries will report the database as unavailable");
            None
        }
    };

    let metadata = match &pool {
        Some(pool) if config.database.metadata_from_db => {
            MetadataRepository::new(pool.clone()).load_all().await?
        }
        _ => Metadata::load(&config.metadata.dir)
            .with_context(|| format!("loading metadata from {}", config.metadata.dir.display()))?,
    };

    if config.llm.api_key.is_none() {
        warn!("No LLM API key configured; SQL generation is unavailable");
    }

    let backends = Backends::from_config(&config, pool)?;
    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::new(config, Arc::new(metadata), backends);

    let shutdown = CancellationToken::new();
    let jobs = jobs::spawn_all(&state, &shutdown);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    api::serve(state, &bind_addr, shutdown.clone()).await?;
    shutdown.cancel();
    for job in jobs {
        job.await.ok();
    }
    Ok(())
}
