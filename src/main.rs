//! # careguide CLI
//!
//! Thin command-line exerciser over the `careguide` library.
//!
//! ## Usage
//!
//! ```bash
//! careguide --config ./config/careguide.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `careguide chunk <file>` | Print the chunk spans for a file |
//! | `careguide search "<query>"` | Ingest the corpus and print ranked candidates |
//! | `careguide ask "<query>"` | Ingest the corpus and run the full answer pipeline |
//! | `careguide check "<text>"` | Run the emergency detector only |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `careguide=info,careguide_core=info`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use careguide::cancellation::CancellationToken;
use careguide::config::{self, Config};
use careguide::corpus::scan_corpus;
use careguide::engine::Engine;
use careguide::retrieval::HybridRetriever;
use careguide_core::chunk::split;
use careguide_core::vector::MetadataFilter;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// careguide: retrieval-grounded answers to patient procedure questions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/careguide.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "careguide", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/careguide.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the chunk spans produced for a text file.
    Chunk {
        /// File to chunk (read as UTF-8).
        file: PathBuf,
    },

    /// Ingest the corpus and print ranked hybrid retrieval candidates.
    Search {
        query: String,

        /// Show normalized semantic and keyword scores for each candidate.
        #[arg(long)]
        explain: bool,

        /// Restrict keyword and semantic hits to one procedure tag.
        #[arg(long)]
        procedure: Option<String>,
    },

    /// Ingest the corpus and answer a question end to end.
    Ask {
        query: String,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check text against the emergency detector.
    Check { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("careguide=info,careguide_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chunk { file } => {
            let cfg = config_or_default(&cli.config)?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let params = cfg.chunking_params()?;
            let spans = split(&text, &params);
            println!(
                "{} chunk(s) (max {}, overlap {})",
                spans.len(),
                params.max_chunk_size(),
                params.overlap()
            );
            for (i, span) in spans.iter().enumerate() {
                let preview: String = span.text.chars().take(60).collect();
                println!(
                    "  #{:<3} [{}..{}) {} chars  {:?}",
                    i,
                    span.start,
                    span.end,
                    span.len(),
                    preview
                );
            }
        }
        Commands::Check { text } => {
            let cfg = config_or_default(&cli.config)?;
            let detector = cfg.emergency_detector()?;
            match detector.matched(&text) {
                Some(m) => println!("emergency: matched '{}'", m),
                None => println!("no emergency detected"),
            }
        }
        Commands::Search {
            query,
            explain,
            procedure,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let engine = load_engine(cfg).await?;
            let mut retriever = HybridRetriever::new(
                engine.keyword.clone(),
                engine.vectors.clone(),
                engine.gateway.clone(),
                &engine.config,
            )?;
            if let Some(tag) = procedure {
                retriever = retriever.with_filter(MetadataFilter {
                    procedure_tag: Some(tag),
                    ..Default::default()
                });
            }

            let cancel = cancel_on_ctrl_c();
            let result = retriever.retrieve(&query, &cancel).await;
            if let Some(e) = &result.semantic_error {
                println!("(semantic search unavailable: {})", e);
            }
            if result.candidates.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for candidate in &result.candidates {
                println!(
                    "{}. [{:.3}] {}",
                    candidate.rank, candidate.combined_score, candidate.chunk_id
                );
                if explain {
                    println!(
                        "     semantic={} keyword={} raw_semantic={} alpha={}",
                        fmt_score(candidate.semantic_score),
                        fmt_score(candidate.keyword_score),
                        fmt_score(candidate.raw_semantic),
                        retriever.params().alpha()
                    );
                }
                if let Some(chunk) = engine.keyword.chunk(&candidate.chunk_id) {
                    let preview: String = chunk.text.chars().take(120).collect();
                    println!("     {}", preview.replace('\n', " "));
                }
            }
        }
        Commands::Ask { query, json } => {
            let cfg = config::load_config(&cli.config)?;
            let engine = load_engine(cfg).await?;
            let cancel = cancel_on_ctrl_c();
            let response = engine.orchestrator.answer(&query, &cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer);
                if !response.citations.is_empty() {
                    println!();
                    println!("Sources: {}", response.citations.join(", "));
                }
                if response.low_confidence {
                    println!("(low confidence)");
                }
            }
        }
    }
    Ok(())
}

async fn load_engine(cfg: Config) -> Result<Engine> {
    let Some(corpus) = cfg.corpus.clone() else {
        bail!("[corpus] section is required for this command");
    };
    let engine = Engine::from_config(cfg)?;
    let documents = scan_corpus(&corpus)?;
    let report = engine.ingestor.ingest(documents, true).await;
    if report.indexed_chunks == 0 {
        bail!("Corpus at {} produced no chunks", corpus.root.display());
    }
    Ok(engine)
}

fn config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    token
}

fn fmt_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.3}", s))
}
