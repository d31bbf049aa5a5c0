//! End-to-end index construction: transcript → records → embeddings → index → disk.
//!
//! Records are embedded in fixed-size batches with a bounded number of requests
//! in flight. Batches may complete in any order but are appended to the index
//! in call order, so positions always follow transcript order.

use std::path::Path;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::EmbedderConfig;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::handle::IndexHandle;
use crate::index::{FlatVectorIndex, Metadata, SearchHit};
use crate::persist::{self, Manifest, Provenance};
use crate::transcript::{self, IngestStats};
use crate::vector::l2_normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub normalize: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions::from(&EmbedderConfig::default())
    }
}

impl From<&EmbedderConfig> for BuildOptions {
    fn from(config: &EmbedderConfig) -> Self {
        BuildOptions {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            normalize: config.normalize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub stats: IngestStats,
    pub manifest: Manifest,
}

/// Embeds every record's text and builds an index over them, in record order.
pub async fn embed_records<E: Embedder>(
    embedder: &E,
    records: &[Metadata],
    options: &BuildOptions,
) -> Result<FlatVectorIndex> {
    let batch_size = options.batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);

    let mut batches = futures::stream::iter(records.chunks(batch_size).enumerate())
        .map(move |(batch, chunk)| async move {
            let texts: Vec<String> = chunk.iter().map(|m| m.text.clone()).collect();
            (batch, chunk, embedder.embed(&texts).await)
        })
        .buffered(options.concurrency.max(1));

    let mut index = FlatVectorIndex::new();
    while let Some((batch, chunk, result)) = batches.next().await {
        let first_sequence_id = chunk.first().map_or(0, |m| m.sequence_id);
        let failure = |detail: String| IndexError::EmbedderFailure { batch, first_sequence_id, detail };

        let mut vectors = result.map_err(|e| failure(e.to_string()))?;
        if vectors.len() != chunk.len() {
            return Err(failure(format!("expected {} embeddings, got {}", chunk.len(), vectors.len())));
        }
        if options.normalize {
            vectors.iter_mut().for_each(|v| l2_normalize(v));
        }

        if let Err(e) = index.add(vectors, chunk.to_vec()) {
            warn!(batch, first_sequence_id, error = %e, "embedder returned unusable vectors");
            return Err(e);
        }
        debug!(batch = batch + 1, total_batches, indexed = index.len(), "embedded batch");
    }

    Ok(index)
}

/// Full build from a transcript file, replacing whatever index is at `index_dir`.
pub async fn ingest<E: Embedder>(
    embedder: &E,
    transcript_path: &Path,
    index_dir: &Path,
    options: &BuildOptions,
) -> Result<IngestReport> {
    let (index, stats) = build_from_transcript(embedder, transcript_path, options).await?;
    let manifest = persist::save_with(&index, index_dir, &provenance(embedder, transcript_path, stats))?;
    log_ingest(transcript_path, index_dir, &manifest, &stats);
    Ok(IngestReport { stats, manifest })
}

/// Rebuilds the handle's index from the transcript, then saves and swaps it in.
/// Embedding runs without any lock; only the save and swap hold the writer lock,
/// and searches keep running on the previous snapshot until the swap.
pub async fn refresh<E: Embedder>(
    embedder: &E,
    handle: &IndexHandle,
    transcript_path: &Path,
    options: &BuildOptions,
) -> Result<IngestReport> {
    let Some(dir) = handle.dir() else {
        return Err(IndexError::Config("cannot refresh an index with no backing directory".to_string()));
    };

    let (index, stats) = build_from_transcript(embedder, transcript_path, options).await?;
    let manifest = handle.install(index, &provenance(embedder, transcript_path, stats))?;
    log_ingest(transcript_path, dir, &manifest, &stats);
    Ok(IngestReport { stats, manifest })
}

async fn build_from_transcript<E: Embedder>(
    embedder: &E,
    transcript_path: &Path,
    options: &BuildOptions,
) -> Result<(FlatVectorIndex, IngestStats)> {
    let parsed = transcript::read_transcript(transcript_path)?;
    if parsed.records.is_empty() {
        warn!(path = %transcript_path.display(), "transcript has no usable lines, saving an empty index");
    }

    let index = embed_records(embedder, &parsed.records, options).await?;
    Ok((index, parsed.stats))
}

fn provenance<E: Embedder>(embedder: &E, transcript_path: &Path, stats: IngestStats) -> Provenance {
    Provenance {
        embedding_model: embedder.model_name().map(str::to_string),
        source: Some(transcript_path.to_path_buf()),
        stats: Some(stats),
    }
}

fn log_ingest(transcript_path: &Path, index_dir: &Path, manifest: &Manifest, stats: &IngestStats) {
    info!(
        source = %transcript_path.display(),
        index = %index_dir.display(),
        n = manifest.count,
        user = stats.user,
        assistant = stats.assistant,
        unknown = stats.unknown,
        empty = stats.empty,
        "ingested transcript"
    );
}

/// Rebuilds the index at `index_dir` from its surviving metadata, re-deriving
/// every vector from the stored text. For when the vector artifact is lost but
/// the metadata side table is intact.
pub async fn rebuild_from_metadata<E: Embedder>(
    embedder: &E,
    index_dir: &Path,
    options: &BuildOptions,
) -> Result<FlatVectorIndex> {
    let previous = persist::read_manifest(index_dir)?;
    let records = persist::recover_metadata(index_dir)?;
    info!(path = %index_dir.display(), records = records.len(), "re-embedding recovered metadata");

    let index = embed_records(embedder, &records, options).await?;

    let provenance = Provenance {
        embedding_model: embedder.model_name().map(str::to_string),
        source: previous.source,
        stats: previous.stats,
    };
    persist::save_with(&index, index_dir, &provenance)?;
    Ok(index)
}

/// Embeds `text` and returns the `k` nearest records, ready for a generator.
pub async fn query<E: Embedder>(
    embedder: &E,
    index: &FlatVectorIndex,
    text: &str,
    k: usize,
    normalize: bool,
) -> Result<Vec<SearchHit>> {
    let failure = |detail: String| IndexError::EmbedderFailure { batch: 0, first_sequence_id: 0, detail };

    let mut vectors = embedder.embed(&[text.to_string()]).await.map_err(|e| failure(e.to_string()))?;
    let mut vector = match vectors.pop() {
        Some(v) if vectors.is_empty() => v,
        _ => return Err(failure("expected exactly one embedding for the query".to_string())),
    };
    if normalize {
        l2_normalize(&mut vector);
    }

    index.search(&vector, k)
}
