//! Persisted index layout, save/load, corruption detection and rebuild.
//!
//! An index directory looks like this:
//!
//! ```text
//! <dir>/manifest.json             {n, d, schema_version, created_at, generation, ...}
//! <dir>/gen-<uuid>/vectors.bin    magic "SMVX" | d: u32 | n: u64 | n*d f32, little-endian, row-major
//! <dir>/gen-<uuid>/metadata.bin   bincode Vec<Metadata>, position order
//! ```
//!
//! Data artifacts are written into a fresh generation directory that nothing
//! references yet. The manifest is then replaced in one rename, so a reader
//! always sees a manifest that matches the generation it names. The previous
//! generation is kept for readers that are still using it. Each manifest also
//! names the generation it replaced, and a save removes only that one: the
//! generation two commits back. Directories of other savers, committed or still
//! being written, are never touched.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::index::{FlatVectorIndex, Metadata};
use crate::transcript::IngestStats;

pub const SCHEMA_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "metadata.bin";

const VECTOR_MAGIC: [u8; 4] = *b"SMVX";
const VECTOR_HEADER_LEN: usize = 4 + 4 + 8;
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "n")]
    pub count: usize,
    #[serde(rename = "d")]
    pub dimension: Option<usize>,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    /// Directory, relative to the index directory, holding the data artifacts.
    pub generation: String,
    /// Generation this manifest replaced, still on disk for in-flight readers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<IngestStats>,
}

/// Optional facts about where an index came from, recorded in the manifest.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub embedding_model: Option<String>,
    pub source: Option<PathBuf>,
    pub stats: Option<IngestStats>,
}

/// Removes a half-written generation directory unless it was committed.
struct GenerationGuard {
    dir: PathBuf,
    committed: bool,
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

/// Saves the index to `dir`, replacing whatever index was there.
pub fn save(index: &FlatVectorIndex, dir: impl AsRef<Path>) -> Result<Manifest> {
    save_with(index, dir, &Provenance::default())
}

pub fn save_with(index: &FlatVectorIndex, dir: impl AsRef<Path>, provenance: &Provenance) -> Result<Manifest> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let previous = read_manifest(dir).ok();

    let generation = format!("{}{}", GENERATION_PREFIX, uuid::Uuid::new_v4().simple());
    let generation_dir = dir.join(&generation);
    fs::create_dir(&generation_dir)?;
    let mut guard = GenerationGuard { dir: generation_dir.clone(), committed: false };

    write_vectors(index, &generation_dir.join(VECTORS_FILE))?;
    write_metadata(index.records(), &generation_dir.join(METADATA_FILE))?;

    #[cfg(test)]
    {
        if save_fault::armed() {
            return Err(IndexError::Io(std::io::Error::other("simulated failure before manifest commit")));
        }
    }

    let manifest = Manifest {
        count: index.len(),
        dimension: index.dimension(),
        schema_version: SCHEMA_VERSION,
        created_at: Utc::now(),
        generation: generation.clone(),
        previous_generation: previous.as_ref().map(|m| m.generation.clone()),
        embedding_model: provenance.embedding_model.clone(),
        source: provenance.source.clone(),
        stats: provenance.stats,
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, &manifest)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(MANIFEST_FILE)).map_err(|e| IndexError::Io(e.error))?;
    guard.committed = true;

    if let Some(previous) = previous {
        if let Some(superseded) = previous.previous_generation.as_deref() {
            prune_generation(dir, superseded, &[generation.as_str(), previous.generation.as_str()]);
        }
    }

    info!(
        path = %dir.display(),
        n = manifest.count,
        d = ?manifest.dimension,
        generation = %generation,
        "saved index"
    );
    Ok(manifest)
}

fn write_vectors(index: &FlatVectorIndex, path: &Path) -> Result<()> {
    let dim = index.dimension().unwrap_or(0);
    let dim = u32::try_from(dim).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("dimension {} too large to persist", dim))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&VECTOR_MAGIC)?;
    writer.write_all(&dim.to_le_bytes())?;
    writer.write_all(&(index.len() as u64).to_le_bytes())?;
    for x in index.raw_vectors() {
        writer.write_all(&x.to_le_bytes())?;
    }

    let file = writer.into_inner().map_err(|e| IndexError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

fn write_metadata(records: &[Metadata], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, records)?;

    let file = writer.into_inner().map_err(|e| IndexError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Removes the generation that the replaced manifest itself had replaced.
fn prune_generation(dir: &Path, superseded: &str, keep: &[&str]) {
    if keep.contains(&superseded) || !is_generation_name(superseded) {
        return;
    }
    let path = dir.join(superseded);
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(&path) {
        Ok(()) => debug!(generation = superseded, "pruned old generation"),
        Err(e) => warn!(generation = superseded, error = %e, "could not prune old generation"),
    }
}

fn is_generation_name(name: &str) -> bool {
    name.starts_with(GENERATION_PREFIX) && !name.contains(['/', '\\']) && name != GENERATION_PREFIX
}

#[cfg(test)]
pub(crate) mod save_fault {
    use std::cell::Cell;

    thread_local! {
        static ARMED: Cell<bool> = const { Cell::new(false) };
    }

    /// Makes saves on the current thread fail after their data artifacts are written.
    pub(crate) fn arm(on: bool) {
        ARMED.with(|a| a.set(on));
    }

    pub(super) fn armed() -> bool {
        ARMED.with(|a| a.get())
    }
}

/// Reads and checks the manifest of the index at `dir`.
pub fn read_manifest(dir: impl AsRef<Path>) -> Result<Manifest> {
    let dir = dir.as_ref();
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(IndexError::IndexNotFound { path: dir.to_path_buf() });
    }

    let file = File::open(&path)?;
    let manifest: Manifest = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| IndexError::corrupt(dir, format!("unreadable manifest: {}", e)))?;

    if manifest.schema_version != SCHEMA_VERSION {
        return Err(IndexError::corrupt(
            dir,
            format!("unsupported schema version {}", manifest.schema_version),
        ));
    }
    if manifest.generation.is_empty()
        || manifest.generation.contains(['/', '\\'])
        || manifest.generation.starts_with('.')
    {
        return Err(IndexError::corrupt(dir, format!("invalid generation '{}'", manifest.generation)));
    }
    if manifest.dimension.is_none() && manifest.count != 0 {
        return Err(IndexError::corrupt(dir, format!("manifest has n = {} but no dimension", manifest.count)));
    }

    Ok(manifest)
}

/// Loads the index saved at `dir`.
///
/// # Returns
///
/// * `Ok(FlatVectorIndex)` - The same records, in the same order, as were saved
/// * `Err(IndexNotFound)` - No manifest at `dir`
/// * `Err(IndexCorrupt)` - An artifact is missing or disagrees with the manifest
pub fn load(dir: impl AsRef<Path>) -> Result<FlatVectorIndex> {
    load_with_manifest(dir).map(|(index, _)| index)
}

pub fn load_with_manifest(dir: impl AsRef<Path>) -> Result<(FlatVectorIndex, Manifest)> {
    let dir = dir.as_ref();
    let manifest = read_manifest(dir)?;
    let generation_dir = dir.join(&manifest.generation);

    let (dimension, vectors) = read_vectors(dir, &generation_dir.join(VECTORS_FILE), &manifest)?;
    let records = read_metadata(dir, &generation_dir.join(METADATA_FILE))?;

    if records.len() != manifest.count {
        return Err(IndexError::corrupt(
            dir,
            format!("manifest n = {} but metadata holds {} records", manifest.count, records.len()),
        ));
    }

    info!(path = %dir.display(), n = manifest.count, d = ?manifest.dimension, "loaded index");
    Ok((FlatVectorIndex::from_parts(dimension, vectors, records), manifest))
}

fn read_vectors(dir: &Path, path: &Path, manifest: &Manifest) -> Result<(Option<usize>, Vec<f32>)> {
    if !path.is_file() {
        return Err(IndexError::corrupt(dir, "vector artifact missing"));
    }
    let bytes = fs::read(path)?;

    if bytes.len() < VECTOR_HEADER_LEN || bytes[0..4] != VECTOR_MAGIC {
        return Err(IndexError::corrupt(dir, "vector artifact has no valid header"));
    }
    let dim = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[8..16]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    if count != manifest.count {
        return Err(IndexError::corrupt(
            dir,
            format!("manifest n = {} but vector artifact holds {} vectors", manifest.count, count),
        ));
    }
    if dim != manifest.dimension.unwrap_or(0) {
        return Err(IndexError::corrupt(
            dir,
            format!("manifest d = {:?} but vector artifact has dimension {}", manifest.dimension, dim),
        ));
    }

    let payload = &bytes[VECTOR_HEADER_LEN..];
    let expected = count
        .checked_mul(dim)
        .and_then(|floats| floats.checked_mul(4))
        .ok_or_else(|| IndexError::corrupt(dir, "vector artifact size overflows"))?;
    if payload.len() != expected {
        return Err(IndexError::corrupt(
            dir,
            format!("vector payload is {} bytes, expected {}", payload.len(), expected),
        ));
    }

    let vectors = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok((manifest.dimension, vectors))
}

fn read_metadata(dir: &Path, path: &Path) -> Result<Vec<Metadata>> {
    if !path.is_file() {
        return Err(IndexError::corrupt(dir, "metadata artifact missing"));
    }
    let file = File::open(path)?;
    bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| IndexError::corrupt(dir, format!("unreadable metadata: {}", e)))
}

/// Reads only the metadata side table, for rebuilding when the vector
/// artifact is missing or unreadable.
pub fn recover_metadata(dir: impl AsRef<Path>) -> Result<Vec<Metadata>> {
    let dir = dir.as_ref();
    let manifest = read_manifest(dir)?;
    let records = read_metadata(dir, &dir.join(&manifest.generation).join(METADATA_FILE))?;

    if records.len() != manifest.count {
        warn!(
            path = %dir.display(),
            manifest_n = manifest.count,
            recovered = records.len(),
            "recovered metadata disagrees with manifest"
        );
    }
    Ok(records)
}

/// Builds a brand-new index and saves it over whatever is at `dir`.
pub fn rebuild(vectors: Vec<Vec<f32>>, metadata: Vec<Metadata>, dir: impl AsRef<Path>) -> Result<FlatVectorIndex> {
    rebuild_with(vectors, metadata, dir, &Provenance::default())
}

pub fn rebuild_with(
    vectors: Vec<Vec<f32>>,
    metadata: Vec<Metadata>,
    dir: impl AsRef<Path>,
    provenance: &Provenance,
) -> Result<FlatVectorIndex> {
    let dir = dir.as_ref();
    let index = FlatVectorIndex::build(vectors, metadata)?;
    save_with(&index, dir, provenance)?;
    info!(path = %dir.display(), n = index.len(), "rebuilt index");
    Ok(index)
}

// ========== Verification ==========

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactStatus {
    pub name: &'static str,
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub count: usize,
    pub dimension: Option<usize>,
    /// Whether searching with the first stored vector returns that record first
    /// at distance 0. `None` for an empty index.
    pub self_match: Option<bool>,
    pub artifacts: Vec<ArtifactStatus>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.self_match != Some(false)
    }
}

/// Read-only sanity check of an in-memory index.
pub fn verify(index: &FlatVectorIndex) -> VerifyReport {
    let self_match = index.get(0).map(|(stored, _)| match index.search(stored, 1) {
        Ok(hits) => hits.first().is_some_and(|h| h.position == 0 && h.distance == 0.0),
        Err(_) => false,
    });

    VerifyReport {
        count: index.len(),
        dimension: index.dimension(),
        self_match,
        artifacts: Vec::new(),
    }
}

/// Loads the index at `dir` and checks it. Load failures are returned as errors;
/// use [`artifact_status`] to inspect the files of an index that does not load.
pub fn verify_path(dir: impl AsRef<Path>) -> Result<VerifyReport> {
    let dir = dir.as_ref();
    let index = load(dir)?;
    let mut report = verify(&index);
    report.artifacts = artifact_status(dir);

    if !report.is_healthy() {
        warn!(path = %dir.display(), "self-consistency check failed");
    }
    Ok(report)
}

/// Existence and size of each artifact of the index at `dir`.
pub fn artifact_status(dir: impl AsRef<Path>) -> Vec<ArtifactStatus> {
    let dir = dir.as_ref();
    let manifest_path = dir.join(MANIFEST_FILE);
    let generation_dir = read_manifest(dir).ok().map(|m| dir.join(m.generation));

    let mut paths = vec![(MANIFEST_FILE, Some(manifest_path))];
    paths.push((VECTORS_FILE, generation_dir.as_ref().map(|g| g.join(VECTORS_FILE))));
    paths.push((METADATA_FILE, generation_dir.as_ref().map(|g| g.join(METADATA_FILE))));

    paths
        .into_iter()
        .map(|(name, path)| {
            let size_bytes = path.as_ref().and_then(|p| fs::metadata(p).ok()).map(|m| m.len());
            ArtifactStatus {
                name,
                path: path.unwrap_or_else(|| dir.join(name)),
                exists: size_bytes.is_some(),
                size_bytes,
            }
        })
        .collect()
}

#[cfg(test)]
mod persist_test {
    use super::*;
    use crate::transcript::Role;

    fn sample_index() -> FlatVectorIndex {
        FlatVectorIndex::build(
            vec![vec![1.0, 0.0, 0.5], vec![0.0, 1.0, -0.5], vec![0.25, 0.25, 0.25]],
            vec![
                Metadata::new("douleur main", 1, Role::User),
                Metadata::new("repos", 3, Role::Assistant),
                Metadata::new("plain line", 4, Role::Unknown),
            ],
        ).unwrap()
    }

    fn set_manifest_field(dir: &Path, field: &str, value: serde_json::Value) {
        let path = dir.join(MANIFEST_FILE);
        let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        json[field] = value;
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
    }

    fn generation_dir(dir: &Path) -> PathBuf {
        dir.join(read_manifest(dir).unwrap().generation)
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();

        let manifest = save(&index, dir.path()).unwrap();
        assert_eq!(manifest.count, 3);
        assert_eq!(manifest.dimension, Some(3));
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_save_and_load_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        save(&FlatVectorIndex::new(), dir.path()).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), None);
    }

    #[test]
    fn test_manifest_uses_short_keys() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(json["n"], 3);
        assert_eq!(json["d"], 3);
        assert_eq!(json["schema_version"], 1);
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn test_provenance_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let provenance = Provenance {
            embedding_model: Some("text-embedding-3-small".to_string()),
            source: Some(PathBuf::from("conversations.txt")),
            stats: Some(IngestStats { user: 1, assistant: 1, unknown: 1, empty: 2 }),
        };
        save_with(&sample_index(), dir.path(), &provenance).unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        assert_eq!(manifest.embedding_model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(manifest.stats.unwrap().empty, 2);
    }

    #[test]
    fn test_load_nonexistent_dir() {
        match load("nonexistent_index_dir") {
            Err(IndexError::IndexNotFound { .. }) => {}
            other => panic!("Expected IndexNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_altered_count() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        set_manifest_field(dir.path(), "n", serde_json::json!(2));

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_altered_dimension() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        set_manifest_field(dir.path(), "d", serde_json::json!(4));

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_unknown_schema() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        set_manifest_field(dir.path(), "schema_version", serde_json::json!(99));

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_escaping_generation() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        set_manifest_field(dir.path(), "generation", serde_json::json!("../elsewhere"));

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_load_rejects_truncated_vectors() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();

        let path = generation_dir(dir.path()).join(VECTORS_FILE);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_missing_vectors_is_corrupt_but_metadata_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();
        save(&index, dir.path()).unwrap();
        fs::remove_file(generation_dir(dir.path()).join(VECTORS_FILE)).unwrap();

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));

        let recovered = recover_metadata(dir.path()).unwrap();
        assert_eq!(recovered, index.records());
    }

    #[test]
    fn test_garbage_metadata_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        fs::write(generation_dir(dir.path()).join(METADATA_FILE), b"not bincode").unwrap();

        assert!(matches!(load(dir.path()), Err(IndexError::IndexCorrupt { .. })));
    }

    #[test]
    fn test_save_overwrite_keeps_one_previous_generation() {
        let dir = tempfile::tempdir().unwrap();

        let first = save(&sample_index(), dir.path()).unwrap();
        let second = save(&sample_index(), dir.path()).unwrap();

        let replacement = FlatVectorIndex::build(
            vec![vec![9.0, 9.0]],
            vec![Metadata::new("new", 1, Role::User)],
        ).unwrap();
        let third = save(&replacement, dir.path()).unwrap();

        assert!(!dir.path().join(&first.generation).exists());
        assert!(dir.path().join(&second.generation).exists());
        assert!(dir.path().join(&third.generation).exists());

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded, replacement);
    }

    #[test]
    fn test_save_leaves_other_savers_generations_alone() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();
        save(&index, dir.path()).unwrap();

        // A generation another saver is still writing, not yet named by any manifest
        let in_flight = dir.path().join("gen-in-flight");
        fs::create_dir(&in_flight).unwrap();
        fs::write(in_flight.join(VECTORS_FILE), b"partial").unwrap();

        for _ in 0..3 {
            save(&index, dir.path()).unwrap();
        }

        assert!(in_flight.join(VECTORS_FILE).exists());
        assert_eq!(load(dir.path()).unwrap(), index);
    }

    #[test]
    fn test_manifest_records_replaced_generation() {
        let dir = tempfile::tempdir().unwrap();
        let first = save(&sample_index(), dir.path()).unwrap();
        let second = save(&sample_index(), dir.path()).unwrap();

        assert_eq!(first.previous_generation, None);
        assert_eq!(second.previous_generation.as_deref(), Some(first.generation.as_str()));
        assert_eq!(read_manifest(dir.path()).unwrap(), second);
    }

    #[test]
    fn test_failed_save_leaves_prior_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();
        let committed = save(&index, dir.path()).unwrap();

        let replacement = FlatVectorIndex::build(
            vec![vec![9.0, 9.0]],
            vec![Metadata::new("new", 1, Role::User)],
        ).unwrap();

        save_fault::arm(true);
        let result = save(&replacement, dir.path());
        save_fault::arm(false);

        assert!(matches!(result, Err(IndexError::Io(_))));
        assert_eq!(read_manifest(dir.path()).unwrap(), committed);
        assert_eq!(load(dir.path()).unwrap(), index);

        let generations: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(GENERATION_PREFIX))
            .collect();
        assert_eq!(generations, vec![committed.generation]);
    }

    #[test]
    fn test_rebuild_replaces_corrupt_index() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();
        set_manifest_field(dir.path(), "n", serde_json::json!(7));
        assert!(load(dir.path()).unwrap_err().is_recoverable_by_rebuild());

        let rebuilt = rebuild(
            vec![vec![1.0, 1.0], vec![2.0, 2.0]],
            vec![Metadata::new("a", 1, Role::User), Metadata::new("b", 2, Role::Assistant)],
            dir.path(),
        ).unwrap();

        assert_eq!(load(dir.path()).unwrap(), rebuilt);
    }

    #[test]
    fn test_rebuild_validation_error_leaves_prior_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();
        save(&index, dir.path()).unwrap();

        let result = rebuild(vec![vec![1.0]], vec![], dir.path());
        assert!(matches!(result, Err(IndexError::ArityMismatch { .. })));
        assert_eq!(load(dir.path()).unwrap(), index);
    }

    // ========== Verify Tests ==========

    #[test]
    fn test_verify_in_memory() {
        let report = verify(&sample_index());
        assert_eq!(report.count, 3);
        assert_eq!(report.dimension, Some(3));
        assert_eq!(report.self_match, Some(true));
        assert!(report.is_healthy());

        let empty = verify(&FlatVectorIndex::new());
        assert_eq!(empty.self_match, None);
        assert!(empty.is_healthy());
    }

    #[test]
    fn test_verify_path_reports_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_index(), dir.path()).unwrap();

        let report = verify_path(dir.path()).unwrap();
        assert_eq!(report.count, 3);
        assert_eq!(report.artifacts.len(), 3);
        assert!(report.artifacts.iter().all(|a| a.exists && a.size_bytes.unwrap() > 0));
    }

    #[test]
    fn test_artifact_status_for_missing_index() {
        let dir = tempfile::tempdir().unwrap();
        let status = artifact_status(dir.path());
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|a| !a.exists));
    }
}
