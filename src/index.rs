//! The index module
//! Provide the flat (exhaustive) L2 vector index and its records

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::transcript::Role;
use crate::vector::{check_dimension, squared_l2};

/// Content stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub text: String,
    /// 1-based line number in the source transcript. Not necessarily contiguous.
    pub sequence_id: u64,
    pub role: Role,
    /// Length of `text` in characters.
    pub length: usize,
    pub created_at: DateTime<Utc>,
}

impl Metadata {
    pub fn new(text: impl Into<String>, sequence_id: u64, role: Role) -> Self {
        let text = text.into();
        Metadata {
            length: text.chars().count(),
            text,
            sequence_id,
            role,
            created_at: Utc::now(),
        }
    }
}

/// One search result: the record at `position` and its squared L2 distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub position: usize,
    pub metadata: Metadata,
    pub distance: f32,
}

impl SearchHit {
    /// Display similarity, `1 - distance`. Ordering is defined by `distance` only.
    pub fn score(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Append-only flat vector index.
///
/// Vectors are stored contiguously as `[v0_d0, v0_d1, ..., v1_d0, ...]` with a
/// parallel list of [`Metadata`]. A record's insertion position is its identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatVectorIndex {
    records: Vec<Metadata>,
    vectors: Vec<f32>,
    dimension: Option<usize>,
}

impl FlatVectorIndex {
    /// Creates a new empty index.
    ///
    /// The index starts with no dimension constraint. The dimension is fixed by
    /// the first vector added.
    ///
    /// # Examples
    ///
    /// ```
    /// use secondmind::FlatVectorIndex;
    ///
    /// let index = FlatVectorIndex::new();
    /// assert_eq!(index.len(), 0);
    /// assert_eq!(index.dimension(), None);
    /// ```
    pub fn new() -> FlatVectorIndex {
        FlatVectorIndex { records: Vec::new(), vectors: Vec::new(), dimension: None }
    }

    /// Builds an index from parallel lists of vectors and metadata.
    ///
    /// # Returns
    ///
    /// * `Ok(FlatVectorIndex)` - Index with `len() == vectors.len()`, records in input order
    /// * `Err(ArityMismatch)` - `vectors` and `metadata` differ in length
    /// * `Err(DimensionMismatch)` - Not all vectors share the same length
    ///
    /// # Examples
    ///
    /// ```
    /// use secondmind::{FlatVectorIndex, Metadata, Role};
    ///
    /// let index = FlatVectorIndex::build(
    ///     vec![vec![1.0, 0.0], vec![0.0, 1.0]],
    ///     vec![Metadata::new("a", 1, Role::User), Metadata::new("b", 2, Role::Assistant)],
    /// ).unwrap();
    /// assert_eq!(index.len(), 2);
    /// assert_eq!(index.dimension(), Some(2));
    ///
    /// // Mixed lengths are rejected
    /// let result = FlatVectorIndex::build(
    ///     vec![vec![1.0, 0.0], vec![1.0]],
    ///     vec![Metadata::new("a", 1, Role::User), Metadata::new("b", 2, Role::User)],
    /// );
    /// assert!(result.is_err());
    /// ```
    pub fn build(vectors: Vec<Vec<f32>>, metadata: Vec<Metadata>) -> Result<Self> {
        let mut index = FlatVectorIndex::new();
        index.add(vectors, metadata)?;
        Ok(index)
    }

    /// Appends a batch of records.
    ///
    /// The whole batch is validated before anything is stored, so a failing call
    /// leaves the index unchanged. Batches keep their call order: adding `A` then
    /// `B` yields the same records as a single build over `A` followed by `B`.
    ///
    /// # Examples
    ///
    /// ```
    /// use secondmind::{FlatVectorIndex, Metadata, Role};
    ///
    /// let mut index = FlatVectorIndex::new();
    /// index.add(vec![vec![1.0, 2.0]], vec![Metadata::new("a", 1, Role::User)]).unwrap();
    ///
    /// // Dimension mismatch error
    /// let result = index.add(vec![vec![1.0, 2.0, 3.0]], vec![Metadata::new("b", 2, Role::User)]);
    /// assert!(result.is_err());
    /// assert_eq!(index.len(), 1);
    /// ```
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, metadata: Vec<Metadata>) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(IndexError::ArityMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }

        let dim = match (self.dimension, vectors.first()) {
            (Some(d), _) => d,
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(()),
        };

        for vector in &vectors {
            check_dimension(vector, dim)?;
        }

        self.dimension = Some(dim);
        self.vectors.reserve(vectors.len() * dim);
        for vector in vectors {
            self.vectors.extend(vector);
        }
        self.records.extend(metadata);

        Ok(())
    }

    /// Merges another index onto the end of this one, preserving both orders.
    pub fn append(&mut self, other: FlatVectorIndex) -> Result<()> {
        let Some(other_dim) = other.dimension else {
            return Ok(());
        };

        match self.dimension {
            Some(d) if d != other_dim => {
                return Err(IndexError::DimensionMismatch { expected: d, actual: other_dim });
            }
            _ => {}
        }

        self.dimension = Some(other_dim);
        self.vectors.extend(other.vectors);
        self.records.extend(other.records);
        Ok(())
    }

    /// Searches for the `k` stored vectors closest to `query`.
    ///
    /// Every stored vector is compared with the query by squared Euclidean
    /// distance. Results are returned in ascending order of distance; equal
    /// distances are ordered by insertion position.
    ///
    /// # Arguments
    ///
    /// * `query` - Query vector, must match the index dimension
    /// * `k` - Number of results to return
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<SearchHit>)` - `min(k, len())` hits; empty when the index is empty
    /// * `Err(DimensionMismatch)` - Query length differs from the index dimension
    ///
    /// # Examples
    ///
    /// ```
    /// use secondmind::{FlatVectorIndex, Metadata, Role};
    ///
    /// let index = FlatVectorIndex::build(
    ///     vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
    ///     vec![
    ///         Metadata::new("a", 1, Role::User),
    ///         Metadata::new("b", 2, Role::Assistant),
    ///         Metadata::new("c", 3, Role::User),
    ///     ],
    /// ).unwrap();
    ///
    /// let hits = index.search(&[1.0, 0.0], 2).unwrap();
    /// assert_eq!(hits.len(), 2);
    /// assert_eq!(hits[0].position, 0);
    /// assert_eq!(hits[0].distance, 0.0);
    /// assert_eq!(hits[1].position, 2);
    /// assert_eq!(hits[1].distance, 1.0);
    /// ```
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        check_dimension(query, dim)?;

        let top_k = k.min(self.len());
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Sorted buffer of (position, distance). Positions are visited in
        // ascending order, so inserting after equal distances keeps the lower
        // position first.
        let mut best: Vec<(usize, f32)> = Vec::with_capacity(top_k + 1);
        for i in 0..self.len() {
            let dist = squared_l2(query, self.row(i))?;
            if best.len() == top_k && best[top_k - 1].1.total_cmp(&dist) != Ordering::Greater {
                continue;
            }
            let insert_index = best.partition_point(|x| x.1.total_cmp(&dist) != Ordering::Greater);
            best.insert(insert_index, (i, dist));
            best.truncate(top_k);
        }

        let result = best.into_iter()
            .map(|(position, distance)| SearchHit {
                position,
                metadata: self.records[position].clone(),
                distance,
            })
            .collect();

        Ok(result)
    }

    /// Returns the vector and metadata stored at `position`.
    pub fn get(&self, position: usize) -> Option<(&[f32], &Metadata)> {
        let metadata = self.records.get(position)?;
        Some((self.row(position), metadata))
    }

    /// Iterates over `(vector, metadata)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[f32], &Metadata)> {
        self.records.iter()
            .enumerate()
            .map(|(i, metadata)| (self.row(i), metadata))
    }

    pub fn records(&self) -> &[Metadata] {
        &self.records
    }

    /// Returns the number of records in the index.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The shared vector length, `None` until the first vector is added.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Row-major vector storage, `len() * dimension` floats.
    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Reassembles an index from persisted parts. The caller has already
    /// checked that the parts agree with each other.
    pub(crate) fn from_parts(dimension: Option<usize>, vectors: Vec<f32>, records: Vec<Metadata>) -> Self {
        FlatVectorIndex { records, vectors, dimension }
    }

    fn row(&self, index: usize) -> &[f32] {
        let dim = self.dimension.unwrap_or(0);
        let start = index * dim;
        &self.vectors[start..start + dim]
    }
}
