//! AnswerForge Search Core
//!
//! Matches free-text questions against a frozen question/answer catalog:
//! - Unit normalization of embeddings
//! - Exact inner-product similarity index
//! - Threshold-gated retrieval
//! - Word-by-word answer streaming

pub mod retrieval;
pub mod stream;

pub use retrieval::{
    CorpusStore, KnowledgeBase, Outcome, QueryResult, Record, RetrievalEngine, RetrievalSettings,
    SimilarityIndex,
};
pub use stream::{AnswerStream, AnswerStreamer, StreamChunk};
