//! Semantic retrieval over a fixed question/answer catalog
//!
//! - `normalize`: unit-length rescaling (cosine via inner product)
//! - `index`: exact nearest-neighbour search
//! - `corpus`: the catalog itself
//! - `engine`: startup construction and per-question threshold gating

pub mod corpus;
pub mod engine;
pub mod index;
pub mod normalize;

pub use corpus::{CorpusStore, Record};
pub use engine::{passes_threshold, KnowledgeBase, RetrievalEngine, RetrievalSettings};
pub use index::SimilarityIndex;
pub use normalize::{normalize, normalize_one, EPSILON};

use serde::Serialize;

/// Best corpus entry for a query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryResult {
    /// Position in the corpus / index
    pub matched_index: usize,

    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Result of answering one question
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Best match cleared the threshold
    Accepted { answer: String, matched: QueryResult },

    /// Nothing close enough; the caller sends the fallback message
    Rejected { best: QueryResult },
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    /// The best match, whether or not it was accepted
    pub fn best(&self) -> QueryResult {
        match self {
            Outcome::Accepted { matched, .. } => *matched,
            Outcome::Rejected { best } => *best,
        }
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted { .. } => "accepted",
            Outcome::Rejected { .. } => "rejected",
        }
    }
}
