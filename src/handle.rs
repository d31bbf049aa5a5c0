//! Shared access to one index.
//!
//! Readers take an `Arc` snapshot and search it without holding any lock.
//! Writers are serialized by a single writer lock, build the next index off to
//! the side, and swap it in; readers still holding the old snapshot finish on it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::error::{IndexError, Result};
use crate::index::{FlatVectorIndex, Metadata, SearchHit};
use crate::persist::{self, Manifest, Provenance};

#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Arc<FlatVectorIndex>>,
    writer: Mutex<()>,
    dir: Option<PathBuf>,
}

impl IndexHandle {
    /// A handle over an in-memory index with no backing directory.
    pub fn new(index: FlatVectorIndex) -> Self {
        IndexHandle {
            current: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            dir: None,
        }
    }

    /// Loads the index persisted at `dir` and remembers `dir` for
    /// [`reload`](Self::reload) and [`rebuild`](Self::rebuild).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let index = persist::load(dir)?;
        Ok(IndexHandle {
            current: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            dir: Some(dir.to_path_buf()),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The index as of now. Later writes do not affect the returned snapshot.
    pub fn snapshot(&self) -> Arc<FlatVectorIndex> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.snapshot().search(query, k)
    }

    /// Swaps in `index` and returns the snapshot it replaced.
    pub fn replace(&self, index: FlatVectorIndex) -> Arc<FlatVectorIndex> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.swap(index)
    }

    /// Appends a batch. On error the current index is untouched.
    pub fn add(&self, vectors: Vec<Vec<f32>>, metadata: Vec<Metadata>) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = FlatVectorIndex::clone(&self.snapshot());
        next.add(vectors, metadata)?;
        self.swap(next);
        Ok(())
    }

    /// Re-reads the backing directory and swaps the result in.
    pub fn reload(&self) -> Result<usize> {
        let dir = self.require_dir()?;
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let index = persist::load(dir)?;
        let n = index.len();
        self.swap(index);
        info!(path = %dir.display(), n, "reloaded index");
        Ok(n)
    }

    /// Saves an already built index to the backing directory and swaps it in,
    /// both under the writer lock.
    pub fn install(&self, index: FlatVectorIndex, provenance: &Provenance) -> Result<Manifest> {
        let dir = self.require_dir()?;
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let manifest = persist::save_with(&index, dir, provenance)?;
        self.swap(index);
        Ok(manifest)
    }

    /// Rebuilds into the backing directory, then swaps the new index in.
    pub fn rebuild(&self, vectors: Vec<Vec<f32>>, metadata: Vec<Metadata>, provenance: &Provenance) -> Result<()> {
        let dir = self.require_dir()?;
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let index = persist::rebuild_with(vectors, metadata, dir, provenance)?;
        self.swap(index);
        Ok(())
    }

    fn swap(&self, index: FlatVectorIndex) -> Arc<FlatVectorIndex> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(index))
    }

    fn require_dir(&self) -> Result<&Path> {
        self.dir
            .as_deref()
            .ok_or_else(|| IndexError::Config("index handle has no backing directory".to_string()))
    }
}
