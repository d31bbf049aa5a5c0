//! Error taxonomy for index construction, persistence, and the collaborators
//! that feed it.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// A vector's length disagrees with the index dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `build` or `add` received a different number of vectors and metadata records.
    #[error("Arity mismatch: {vectors} vectors but {metadata} metadata records")]
    ArityMismatch { vectors: usize, metadata: usize },

    #[error("Index not found at {}", path.display())]
    IndexNotFound { path: PathBuf },

    /// The persisted artifacts disagree with each other or with the manifest.
    /// Recoverable only through an explicit rebuild.
    #[error("Index at {} is corrupt: {detail}", path.display())]
    IndexCorrupt { path: PathBuf, detail: String },

    #[error("Embedder failed on batch {batch} (first sequence id {first_sequence_id}): {detail}")]
    EmbedderFailure {
        batch: usize,
        first_sequence_id: u64,
        detail: String,
    },

    #[error("Source unavailable: {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    /// `true` for the conditions that only an explicit rebuild can clear.
    pub fn is_recoverable_by_rebuild(&self) -> bool {
        matches!(
            self,
            IndexError::IndexNotFound { .. } | IndexError::IndexCorrupt { .. }
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        IndexError::IndexCorrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
