//! # ClipMind CLI
//!
//! Inspect and maintain a ClipMind memory directory.
//!
//! - `clipmind stats` - Store, error and learner statistics
//! - `clipmind search <keywords>...` - Keyword search
//! - `clipmind context <prompt>` - Assemble the context for a prompt
//! - `clipmind patterns [--category]` - Tokens shared across entries
//! - `clipmind cleanup [--max-age-days]` - Expire and consolidate entries
//!
//! Output is JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipmind::{ClipMind, ClipMindConfig};
use clipmind_memory::{ScoredEntry, StoreOptions};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

/// ClipMind - Agent memory for content generation
#[derive(Parser)]
#[command(name = "clipmind")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Memory directory (overrides the configuration file)
    #[arg(short, long, global = true, env = "CLIPMIND_ROOT", value_name = "DIR")]
    root: Option<PathBuf>,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "CLIPMIND_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CLIPMIND_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics
    Stats,

    /// Search entries by keyword
    Search {
        /// Keywords to match
        #[arg(required = true)]
        keywords: Vec<String>,
    },

    /// Build the context for a prompt
    Context {
        /// Prompt text
        prompt: String,

        /// Token ceiling (defaults to the configured maximum)
        #[arg(long)]
        max_tokens: Option<usize>,
    },

    /// Detect recurring tokens
    Patterns {
        /// Restrict to one category
        #[arg(long)]
        category: Option<String>,
    },

    /// Remove old low-importance entries and consolidate
    Cleanup {
        /// Age threshold in days (defaults to the configured value)
        #[arg(long)]
        max_age_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let mut config =
        ClipMindConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config = config.with_storage_root(root);
    }
    if let Commands::Cleanup {
        max_age_days: Some(days),
    } = cli.command
    {
        config.cleanup_max_age_days = days;
    }

    let memory = ClipMind::initialize_with(config, StoreOptions::new())
        .await
        .context("Failed to open memory")?;

    let output = run(&memory, cli.command).await;
    memory
        .shutdown()
        .await
        .context("Failed to flush memory")?;

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn run(memory: &ClipMind, command: Commands) -> Result<Value> {
    match command {
        Commands::Stats => to_json(&memory.get_stats()),
        Commands::Search { keywords } => {
            let results = memory.search(&keywords);
            info!(keywords = ?keywords, results = results.len(), "Search finished");
            Ok(Value::Array(results.iter().map(scored_json).collect()))
        }
        Commands::Context { prompt, max_tokens } => {
            let built = memory.context().build_context(&prompt, max_tokens);
            to_json(&built)
        }
        Commands::Patterns { category } => {
            to_json(&memory.retrieval().detect_patterns(category.as_deref()))
        }
        Commands::Cleanup { .. } => {
            let report = memory.cleanup().await.context("Cleanup failed")?;
            to_json(&report)
        }
    }
}

fn scored_json(scored: &ScoredEntry) -> Value {
    json!({
        "score": scored.score,
        "entry": scored.entry,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
