//! # Docent CLI
//!
//! Ask questions against a persisted vector index and stream the grounded answer.
//!
//! Usage:
//!   docent ask "What is the capital of France?"   # Stream an answer
//!   docent ask -k 8 "..."                         # Retrieve 8 passages
//!   docent check                                  # Validate config and connectivity
//!   docent providers                              # List known providers
//!   docent init                                   # Write the default config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docent_core::DocentConfig;
use docent_core::types::StreamEvent;
use docent_rag::Pipeline;
use futures::StreamExt;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const TRUNCATION_MARKER: &str = "[answer truncated]";

#[derive(Parser)]
#[command(
    name = "docent",
    version,
    about = "📚 Docent: retrieval-augmented answers from your own documents"
)]
struct Cli {
    /// Config file (defaults to ~/.docent/config.toml)
    #[arg(short, long, env = "DOCENT_CONFIG", global = true)]
    config: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question from the index
    Ask {
        /// The question
        query: String,

        /// Number of passages to retrieve (overrides retrieval.k)
        #[arg(short, long)]
        k: Option<NonZeroUsize>,
    },
    /// Validate configuration and check every collaborator is reachable
    Check,
    /// List known LLM and embedding providers
    Providers,
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
            None => DocentConfig::default_path(),
        }
    }

    fn load_config(&self) -> Result<DocentConfig> {
        let path = self.config_path();
        let mut config = if path.exists() {
            DocentConfig::load_from(&path)?
        } else {
            if self.config.is_some() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::debug!("No config at {}, using defaults", path.display());
            DocentConfig::default()
        };
        config.apply_process_env()?;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Ask { query, k } => ask(&cli, query, *k).await,
        Command::Check => check(&cli).await,
        Command::Providers => {
            providers();
            Ok(())
        }
        Command::Init { force } => init(&cli, *force),
    }
}

async fn ask(cli: &Cli, query: &str, k: Option<NonZeroUsize>) -> Result<()> {
    let config = cli.load_config()?;
    let pipeline = Pipeline::connect(&config).await?;
    let k = k.unwrap_or(pipeline.settings().k);

    let mut answer = pipeline.handle_with_k(query, k).await?;
    if answer.is_degraded() {
        eprintln!("⚠️  No context could be retrieved; answering without it.");
    }

    let mut stdout = std::io::stdout().lock();
    while let Some(event) = answer.next().await {
        match event {
            StreamEvent::Fragment(fragment) => {
                stdout.write_all(fragment.text.as_bytes())?;
                stdout.flush()?;
            }
            StreamEvent::Done { .. } => {
                writeln!(stdout)?;
            }
            StreamEvent::Interrupted { reason, .. } => {
                writeln!(stdout, "\n{TRUNCATION_MARKER}")?;
                anyhow::bail!("generation stopped: {reason}");
            }
        }
    }
    Ok(())
}

async fn check(cli: &Cli) -> Result<()> {
    let path = cli.config_path();
    let config = cli.load_config()?;
    println!("✅ Config OK ({})", path.display());

    let pipeline = Pipeline::connect(&config)
        .await
        .context("failed to open collaborators")?;
    let retriever = pipeline.retriever();
    println!(
        "✅ Embedding: {} ({}, {} dims)",
        retriever.embedder().name(),
        config.embedding.model,
        retriever.embedder().dimensions()
    );

    let count = retriever.index().count().await?;
    println!(
        "✅ Index: {} ({}, {count} passages)",
        retriever.index().name(),
        retriever.index().metric()
    );
    if count == 0 {
        println!("   ⚠️  The index is empty; every answer will have no context.");
    }

    docent_providers::verify_chat_model(&config.llm).await?;
    println!("✅ Chat: {} ({})", pipeline.provider().name(), config.llm.model);
    Ok(())
}

fn providers() {
    use docent_providers::provider_registry::get_provider_config;

    println!("📡 Providers:");
    for name in docent_providers::available_providers() {
        match get_provider_config(name) {
            Some(p) => {
                let embeddings = if p.embeddings_path.is_some() { "chat+embed" } else { "chat" };
                let key = p.env_keys.first().copied().unwrap_or("-");
                println!("   {:<12} {:<11} {:<20} {}", p.name, embeddings, key, p.base_url);
            }
            None => println!("   {name:<12} any OpenAI-compatible endpoint via \"custom:<url>\""),
        }
    }
}

fn init(cli: &Cli, force: bool) -> Result<()> {
    let path = cli.config_path();
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    DocentConfig::default().save_to(&path)?;
    println!("✅ Wrote default config to {}", path.display());
    println!("   Set OPENAI_API_KEY (or edit [llm] / [embedding]) and run `docent check`.");
    Ok(())
}
