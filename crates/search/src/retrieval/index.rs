//! Exact inner-product nearest-neighbour index
//!
//! Vectors are stored row-major in one contiguous buffer and searched by
//! brute force. Callers normalize before building and before querying, which
//! makes the inner product a cosine similarity.

use super::QueryResult;
use answerforge_common::errors::{AppError, Result};
use std::cmp::Ordering;

/// Immutable similarity index over `len()` vectors of `dimension()` floats.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl SimilarityIndex {
    /// Build the index from a batch of normalized vectors.
    ///
    /// Row `i` of the batch becomes entry `i` of the index.
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = match vectors.first() {
            Some(first) => first.len(),
            None => return Err(AppError::EmptyCorpus),
        };
        if dimension == 0 {
            return Err(AppError::InvalidInput {
                message: "index vectors must have at least one dimension".to_string(),
            });
        }

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (position, vector) in vectors.into_iter().enumerate() {
            if vector.len() != dimension {
                return Err(AppError::InvalidInput {
                    message: format!(
                        "vector {} has dimension {}, expected {}",
                        position,
                        vector.len(),
                        dimension
                    ),
                });
            }
            data.extend(vector);
        }

        Ok(Self { dimension, data })
    }

    /// Number of indexed vectors
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stored vector at `position`
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        self.data.chunks_exact(self.dimension).nth(position)
    }

    /// Top-`k` entries by inner product with `query`.
    ///
    /// Results are ordered by descending score; equal scores keep the lower
    /// index first. NaN scores rank below every real score. `k` larger than
    /// the index is clamped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<QueryResult>> {
        if query.len() != self.dimension {
            return Err(AppError::InvalidInput {
                message: format!(
                    "query has dimension {}, index expects {}",
                    query.len(),
                    self.dimension
                ),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<QueryResult> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(matched_index, row)| QueryResult {
                matched_index,
                score: inner_product(row, query),
            })
            .collect();

        if k == 1 {
            let best = scored
                .into_iter()
                .reduce(|best, candidate| {
                    if rank(&candidate, &best) == Ordering::Less { candidate } else { best }
                });
            return Ok(best.into_iter().collect());
        }

        scored.sort_by(rank);
        scored.truncate(k);
        Ok(scored)
    }
}

/// Dot product of two equal-length slices.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// Best-first: higher score, then lower index. NaN sorts last.
fn rank(a: &QueryResult, b: &QueryResult) -> Ordering {
    let key = |r: &QueryResult| if r.score.is_nan() { f32::NEG_INFINITY } else { r.score };
    key(b)
        .total_cmp(&key(a))
        .then_with(|| a.matched_index.cmp(&b.matched_index))
}
