//! # Crop Clinic CLI (`clinic`)
//!
//! The `clinic` binary drives the diagnosis service: knowledge base
//! indexing, debug retrieval, one-shot diagnosis, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! clinic --config ./config/clinic.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `clinic init` | Embed the knowledge base and persist the similarity index |
//! | `clinic query "<text>"` | Run a raw retrieval query against the index |
//! | `clinic diagnose <crop> <image>` | Run the full pipeline once and print JSON |
//! | `clinic serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Build the index from the configured knowledge source
//! clinic init --config ./config/clinic.toml
//!
//! # Inspect what the pipeline would retrieve for a prediction
//! clinic query "Crop: Wheat, Disease: Brown Rust" -k 3
//!
//! # Diagnose a leaf photo from the command line
//! clinic diagnose Wheat ./photos/leaf.jpg
//!
//! # Start the server (requires MISTRAL_API_KEY)
//! clinic serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crop_clinic::classifier::ClassifierRouter;
use crop_clinic::config::{self, Config};
use crop_clinic::embedding::create_embedder;
use crop_clinic::generate::create_generator;
use crop_clinic::index::SimilarityIndex;
use crop_clinic::pipeline::DiagnosisPipeline;
use crop_clinic::{knowledge, server};

/// Crop Clinic — leaf-photo crop disease diagnosis with
/// retrieval-augmented advisories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/clinic.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "clinic",
    about = "Crop Clinic — leaf-photo crop disease diagnosis with retrieval-augmented advisories",
    version,
    long_about = "Crop Clinic routes a leaf photo to a per-crop disease classifier, retrieves \
    supporting knowledge from an embedded similarity index, and asks a hosted language model \
    for a farmer-readable advisory."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/clinic.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the similarity index from the knowledge source and persist it.
    ///
    /// Replaces any existing index file. `clinic serve` builds the index
    /// automatically when none exists; run this to rebuild after editing
    /// the knowledge base.
    Init,

    /// Run a raw retrieval query against the persisted index.
    ///
    /// Useful for checking what context the pipeline would hand the
    /// prompt composer for a given prediction.
    Query {
        /// The query text, e.g. `"Crop: Wheat, Disease: Brown Rust"`.
        query: String,

        /// Maximum number of results to return.
        #[arg(short, long, default_value_t = 3)]
        k: usize,
    },

    /// Run the full diagnosis pipeline once and print the result as JSON.
    ///
    /// Requires `MISTRAL_API_KEY` to be set.
    Diagnose {
        /// Crop name, must match a configured classifier (e.g. `Wheat`).
        crop: String,

        /// Path to the leaf photo.
        image: PathBuf,
    },

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind`, loading (or building) the similarity
    /// index first. Requires `MISTRAL_API_KEY` to be set; its absence is
    /// a startup failure, not a deferred request failure.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let embedder = create_embedder(&cfg.embedding)?;
            let records = knowledge::load_records(&cfg.knowledge.path)?;
            let index =
                SimilarityIndex::build(&cfg.index.path, &records, embedder).await?;
            println!(
                "Indexed {} knowledge records into {}",
                index.len().await?,
                cfg.index.path.display()
            );
        }
        Commands::Query { query, k } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let index = SimilarityIndex::ensure(&cfg, embedder).await?;
            let results = index.query(&query, k).await?;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, doc) in results.iter().enumerate() {
                println!("{}. [{:.4}] {} / {}", i + 1, doc.score, doc.crop, doc.disease);
                println!("    {}", doc.text.replace('\n', "\n    "));
                println!();
            }
        }
        Commands::Diagnose { crop, image } => {
            let pipeline = build_pipeline(&cfg).await?;
            let bytes = std::fs::read(&image)?;
            let diagnosis = pipeline
                .diagnose(&crop, &bytes)
                .await
                .map_err(|e| anyhow::anyhow!("{} (stage: {})", e, e.stage()))?;
            println!("{}", serde_json::to_string_pretty(&diagnosis)?);
        }
        Commands::Serve => {
            let pipeline = build_pipeline(&cfg).await?;
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}

/// Wire the long-lived pipeline from configuration.
///
/// Fails fatally on a missing generation credential, an unusable
/// embedding configuration, or an index that can neither be loaded nor
/// rebuilt — the service never starts partially.
async fn build_pipeline(cfg: &Config) -> Result<Arc<DiagnosisPipeline>> {
    let generator = create_generator(&cfg.generation)?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = SimilarityIndex::ensure(cfg, embedder).await?;
    let router = ClassifierRouter::from_config(&cfg.classifier);

    Ok(Arc::new(DiagnosisPipeline::new(
        Arc::new(router),
        Arc::new(index),
        generator,
        cfg.retrieval.top_k,
    )))
}
