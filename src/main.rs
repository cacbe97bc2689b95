//! # manual-rag CLI
//!
//! Runs the HTTP API and exposes the ingest and query pipeline from the
//! command line.
//!
//! ## Usage
//!
//! ```bash
//! manual-rag --config ./config/manual-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `manual-rag serve` | Start the HTTP server |
//! | `manual-rag ingest` | Build indices for every mapped device |
//! | `manual-rag ask <device> "<question>"` | Answer one question |
//! | `manual-rag warmup` | Load or check the embedding provider |
//! | `manual-rag files` | Show mapped manuals and index state |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use manual_rag::config::{self, Config};
use manual_rag::embedding::create_provider;
use manual_rag::generation::create_generator;
use manual_rag::ingest::Ingestor;
use manual_rag::logging;
use manual_rag::mapping::DeviceMapping;
use manual_rag::pipeline::QueryPipeline;
use manual_rag::progress::ProgressMode;
use manual_rag::server;
use manual_rag::store::IndexStore;

/// Question answering over device manuals.
///
/// Settings are read from a TOML file (optional) and environment variables
/// such as `EMBED_PROVIDER`, `OPENAI_API_KEY` and `PORT`. A `.env` file in the
/// working directory is loaded first.
#[derive(Parser)]
#[command(name = "manual-rag", version, about = "Question answering over device manuals")]
struct Cli {
    /// Path to configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "./config/manual-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Build indices for every device in the mapping.
    ///
    /// Devices that already have an index are skipped.
    Ingest {
        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question about one device.
    Ask {
        /// Device id from the device mapping.
        device: String,
        /// The question.
        question: String,
    },

    /// Initialize the embedding provider (downloads the local model if needed).
    Warmup,

    /// List mapped manuals, whether they exist, and whether they are indexed.
    Files,
}

fn build_ingestor(cfg: Config) -> Result<Ingestor> {
    let cfg = Arc::new(cfg);
    let provider = create_provider(&cfg.embedding)?;
    let store = IndexStore::open(cfg.index_dir())?;
    Ok(Ingestor::new(cfg, provider, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Ingest { json } => {
            let ingestor = build_ingestor(cfg)?;
            let mode = if json {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            let report = ingestor.ingest_all(mode.reporter().as_ref()).await?;
            for (device_id, status) in report.iter() {
                println!("{:<24} {}", device_id, status);
            }
        }
        Commands::Ask { device, question } => {
            let generator = create_generator(&cfg.generation)?;
            let ingestor = build_ingestor(cfg)?;
            let pipeline = QueryPipeline::new(ingestor, generator);
            let answer = pipeline.answer(&device, &question, &[]).await?;

            println!("{}", answer.answer);
            println!();
            for (i, doc) in answer.top_docs.iter().enumerate() {
                println!("  [Doc {}] {} (score {:.3})", i + 1, doc.id, doc.score);
            }
        }
        Commands::Warmup => {
            let ingestor = build_ingestor(cfg)?;
            let provider = ingestor.provider();
            provider.warm_up().await?;
            println!(
                "Embedder ready: {} ({} dims)",
                provider.identity(),
                provider.dims()
            );
        }
        Commands::Files => {
            let mapping = DeviceMapping::from_config(&cfg)?;
            let store = IndexStore::open(cfg.index_dir())?;
            if mapping.is_empty() {
                println!("No devices mapped in {}", cfg.devices_path().display());
            }
            for (device_id, relative) in mapping.iter() {
                let path = cfg.resolve_document(relative);
                let exists = if path.is_file() { "present" } else { "MISSING" };
                let indexed = if store.exists(device_id)? {
                    "indexed"
                } else {
                    "not indexed"
                };
                println!(
                    "{:<24} {:<8} {:<12} {}",
                    device_id,
                    exists,
                    indexed,
                    path.display()
                );
            }
        }
    }

    Ok(())
}
