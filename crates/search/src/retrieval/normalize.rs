//! Unit-length rescaling so that inner product equals cosine similarity

use answerforge_common::errors::{AppError, Result};

/// Smallest divisor used when normalizing; guards all-zero embeddings.
pub const EPSILON: f32 = 1e-8;

/// Euclidean norm of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a single vector to unit length.
///
/// A vector whose norm is below [`EPSILON`] is divided by `EPSILON` instead,
/// so degenerate inputs come back finite (all zeros stay all zeros).
pub fn normalize_one(v: &[f32]) -> Vec<f32> {
    let divisor = l2_norm(v).max(EPSILON);
    v.iter().map(|x| x / divisor).collect()
}

/// Normalize a batch of vectors that must all share one non-zero dimension.
pub fn normalize(batch: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
    let dimension = batch
        .first()
        .map(Vec::len)
        .ok_or_else(|| AppError::InvalidInput {
            message: "cannot normalize an empty batch".to_string(),
        })?;

    if dimension == 0 {
        return Err(AppError::InvalidInput {
            message: "vectors must have at least one dimension".to_string(),
        });
    }

    if let Some((position, ragged)) = batch.iter().enumerate().find(|(_, v)| v.len() != dimension) {
        return Err(AppError::InvalidInput {
            message: format!(
                "vector {} has dimension {}, expected {}",
                position,
                ragged.len(),
                dimension
            ),
        });
    }

    Ok(batch.iter().map(|v| normalize_one(v)).collect())
}
