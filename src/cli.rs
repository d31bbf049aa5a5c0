use std::path::{Path, PathBuf};

use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use secondmind::config::{Config, DEFAULT_CONFIG_FILE};
use secondmind::embedder::OpenAiEmbedder;
use secondmind::persist;
use secondmind::pipeline::{self, BuildOptions};
use secondmind::{IndexHandle, SearchHit};

#[derive(Parser, Debug)]
#[command(name = "secondmind", version, about = "Flat vector index over conversation transcripts")]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE, env = "SECONDMIND_CONFIG")]
    pub config: PathBuf,

    /// Index directory, overriding the configuration
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a transcript, embed every line and save a fresh index
    Ingest {
        /// Transcript file, overriding the configuration
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// Nearest records to a raw query vector
    Search {
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        vector: Vec<f32>,
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Embed a question and print the nearest records
    Query {
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Check that the saved index loads and answers a self-match check
    Verify,

    /// Replace the saved index, re-embedding from the transcript or the stored metadata
    Rebuild {
        #[arg(long)]
        transcript: Option<PathBuf>,
        /// Re-embed the texts kept in the metadata table instead of the transcript
        #[arg(long, conflicts_with = "transcript")]
        from_metadata: bool,
    },

    /// Print the saved manifest
    Inspect,

    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("secondmind={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dir) = cli.index_dir {
        config.paths.index_dir = dir;
    }

    match cli.command {
        Command::Ingest { transcript } => ingest(&config, transcript).await,
        Command::Search { vector, k } => search(&config, &vector, k),
        Command::Query { text, k } => query(&config, &text, k).await,
        Command::Verify => verify(&config.paths.index_dir),
        Command::Rebuild { transcript, from_metadata } => {
            if from_metadata {
                rebuild_from_metadata(&config).await
            } else {
                ingest(&config, transcript).await
            }
        }
        Command::Inspect => inspect(&config.paths.index_dir),
        Command::Serve { bind } => serve(&config, bind).await,
    }
}

fn embedder(config: &Config) -> Result<OpenAiEmbedder> {
    let embedder = OpenAiEmbedder::from_config(&config.embedder).context("configuring the embedding client")?;
    tracing::debug!(endpoint = %embedder.endpoint(), model = %config.embedder.model, "embedding client ready");
    Ok(embedder)
}

async fn ingest(config: &Config, transcript: Option<PathBuf>) -> Result<()> {
    let transcript = transcript.unwrap_or_else(|| config.paths.transcript.clone());
    let index_dir = &config.paths.index_dir;

    let report = pipeline::ingest(&embedder(config)?, &transcript, index_dir, &BuildOptions::from(&config.embedder))
        .await
        .with_context(|| format!("ingesting {}", transcript.display()))?;

    let stats = report.stats;
    println!("Indexed {} records into '{}'", report.manifest.count, index_dir.display());
    println!(
        "  user: {}, assistant: {}, unknown: {}, empty lines: {}",
        stats.user, stats.assistant, stats.unknown, stats.empty
    );
    if let Some(d) = report.manifest.dimension {
        println!("  dimension: {}", d);
    }
    Ok(())
}

async fn rebuild_from_metadata(config: &Config) -> Result<()> {
    let index_dir = &config.paths.index_dir;
    let index = pipeline::rebuild_from_metadata(&embedder(config)?, index_dir, &BuildOptions::from(&config.embedder))
        .await
        .with_context(|| format!("rebuilding {} from its metadata", index_dir.display()))?;

    println!("Rebuilt '{}' with {} records", index_dir.display(), index.len());
    Ok(())
}

fn search(config: &Config, vector: &[f32], k: Option<usize>) -> Result<()> {
    let index = load(&config.paths.index_dir)?;
    let hits = index.search(vector, k.unwrap_or(config.search.default_k))?;
    print_hits(&hits);
    Ok(())
}

async fn query(config: &Config, text: &str, k: Option<usize>) -> Result<()> {
    let index = load(&config.paths.index_dir)?;
    let k = k.unwrap_or(config.search.default_k);
    let hits = pipeline::query(&embedder(config)?, &index, text, k, config.embedder.normalize).await?;
    print_hits(&hits);
    Ok(())
}

fn verify(index_dir: &Path) -> Result<()> {
    match persist::verify_path(index_dir) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                bail!("index at '{}' failed the self-match check", index_dir.display());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Artifacts:");
            for artifact in persist::artifact_status(index_dir) {
                match artifact.size_bytes {
                    Some(size) => eprintln!("  {:<14} {} bytes", artifact.name, size),
                    None => eprintln!("  {:<14} missing", artifact.name),
                }
            }
            if e.is_recoverable_by_rebuild() {
                eprintln!("Run `secondmind rebuild` to recreate the index.");
            }
            Err(e).with_context(|| format!("verifying {}", index_dir.display()))
        }
    }
}

fn inspect(index_dir: &Path) -> Result<()> {
    let manifest = persist::read_manifest(index_dir)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

async fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let handle = web::Data::new(load_handle(&config.paths.index_dir)?);
    println!("Serving {} records on http://{}", handle.snapshot().len(), bind);

    let search = web::Data::new(config.search.clone());
    HttpServer::new(move || {
        App::new()
            .app_data(handle.clone())
            .app_data(search.clone())
            .configure(secondmind::server::config)
    })
    .bind(&bind)
    .with_context(|| format!("binding {}", bind))?
    .run()
    .await?;
    Ok(())
}

fn load(index_dir: &Path) -> Result<std::sync::Arc<secondmind::FlatVectorIndex>> {
    Ok(load_handle(index_dir)?.snapshot())
}

fn load_handle(index_dir: &Path) -> Result<IndexHandle> {
    IndexHandle::open(index_dir).with_context(|| {
        format!("opening index at '{}' (run `secondmind ingest` to create it)", index_dir.display())
    })
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results found");
        return;
    }

    println!("Top {} results:", hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. line {} [{}] distance: {:.4}, score: {:.4}",
            rank + 1,
            hit.metadata.sequence_id,
            hit.metadata.role,
            hit.distance,
            hit.score()
        );
        println!("   {}", hit.metadata.text);
    }
}
