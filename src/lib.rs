//! # secondmind - semantic memory over conversation transcripts
//!
//! A flat, exact L2 nearest-neighbor index pairing each vector with a metadata
//! record (text, role, source line). Transcripts are parsed into records,
//! embedded by an external provider, and persisted as a small set of
//! artifacts that are validated against each other on load.
//!
//! ## Example
//!
//! ```
//! use secondmind::{FlatVectorIndex, Metadata, Role};
//!
//! let index = FlatVectorIndex::build(
//!     vec![vec![1.0, 0.0], vec![0.0, 1.0]],
//!     vec![
//!         Metadata::new("user: douleur main", 1, Role::User),
//!         Metadata::new("assistant: repos", 2, Role::Assistant),
//!     ],
//! ).unwrap();
//!
//! let hits = index.search(&[0.9, 0.1], 1).unwrap();
//! assert_eq!(hits[0].metadata.sequence_id, 1);
//! ```

pub mod config;
pub mod embedder;
pub mod error;
pub mod handle;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod server;
pub mod transcript;
pub mod vector;

pub use error::{IndexError, Result};
pub use handle::IndexHandle;
pub use index::{FlatVectorIndex, Metadata, SearchHit};
pub use transcript::{IngestStats, Role};
