//! Startup index construction and per-question retrieval

use super::{
    corpus::CorpusStore,
    index::SimilarityIndex,
    normalize::{normalize, normalize_one},
    Outcome, QueryResult,
};
use answerforge_common::{
    config::{AppConfig, DEFAULT_THRESHOLD},
    embeddings::Embedder,
    errors::{AppError, Result},
    metrics,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Corpus plus the index built from its questions.
///
/// Entry `i` of the index is the embedding of record `i`. Built once,
/// shared read-only behind an `Arc`.
#[derive(Debug)]
pub struct KnowledgeBase {
    corpus: CorpusStore,
    index: SimilarityIndex,
}

impl KnowledgeBase {
    /// Pair an already-built index with its corpus.
    pub fn new(corpus: CorpusStore, index: SimilarityIndex) -> Result<Self> {
        if corpus.len() != index.len() {
            return Err(AppError::InvalidInput {
                message: format!(
                    "index has {} entries for {} corpus records",
                    index.len(),
                    corpus.len()
                ),
            });
        }
        Ok(Self { corpus, index })
    }

    /// Embed every question, normalize, and index.
    pub async fn build(
        corpus: CorpusStore,
        embedder: &dyn Embedder,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let start = Instant::now();
        let questions = corpus.questions();
        let mut raw = Vec::with_capacity(questions.len());

        for batch in questions.chunks(batch_size.max(1)) {
            let vectors = tokio::time::timeout(timeout, embedder.embed_batch(batch))
                .await
                .map_err(|_| AppError::EmbeddingTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })??;

            if vectors.len() != batch.len() {
                return Err(AppError::EmbeddingError {
                    message: format!(
                        "provider returned {} vectors for {} questions",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }
            raw.extend(vectors);
        }

        let index = SimilarityIndex::build(normalize(&raw)?)?;
        let knowledge = Self::new(corpus, index)?;

        info!(
            questions = knowledge.len(),
            dim = knowledge.dimension(),
            model = embedder.model_name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Indexed corpus questions"
        );
        metrics::record_corpus_size(knowledge.len());

        Ok(knowledge)
    }

    pub fn corpus(&self) -> &CorpusStore {
        &self.corpus
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }
}

/// Tunables for [`RetrievalEngine`]
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    /// Scores below this are rejected
    pub threshold: f32,

    /// Upper bound on one query's embedding call, including queueing
    pub embed_timeout: Duration,

    /// Embedding calls allowed in flight at once
    pub max_concurrent: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            embed_timeout: Duration::from_secs(10),
            max_concurrent: 8,
        }
    }
}

impl From<&AppConfig> for RetrievalSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            threshold: config.retrieval.threshold,
            embed_timeout: config.embedding_timeout(),
            max_concurrent: config.embedding.max_concurrent,
        }
    }
}

/// Accept when `score >= threshold`; NaN never passes.
pub fn passes_threshold(score: f32, threshold: f32) -> bool {
    score >= threshold
}

/// Answers questions against a [`KnowledgeBase`].
pub struct RetrievalEngine {
    knowledge: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
    permits: Semaphore,
}

impl RetrievalEngine {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        let permits = Semaphore::new(settings.max_concurrent.max(1));
        Self {
            knowledge,
            embedder,
            settings,
            permits,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn threshold(&self) -> f32 {
        self.settings.threshold
    }

    /// Match `question` against the corpus.
    ///
    /// Blank questions fail before the provider is called. Anything else is
    /// embedded exactly as given.
    #[instrument(skip(self, question), fields(query_id = %Uuid::new_v4()))]
    pub async fn answer(&self, question: &str) -> Result<Outcome> {
        if question.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "question".to_string(),
            });
        }

        let start = Instant::now();
        debug!(question, "Embedding question");

        let best = match self.best_match(question).await {
            Ok(best) => best,
            Err(e) => {
                metrics::record_question(start.elapsed().as_secs_f64(), "error", None);
                return Err(e);
            }
        };

        let outcome = if passes_threshold(best.score, self.settings.threshold) {
            let record = self.knowledge.corpus().get(best.matched_index).ok_or_else(|| {
                AppError::Internal {
                    message: format!("index entry {} has no corpus record", best.matched_index),
                }
            })?;
            Outcome::Accepted {
                answer: record.answer.clone(),
                matched: best,
            }
        } else {
            Outcome::Rejected { best }
        };

        let elapsed = start.elapsed();
        metrics::record_question(elapsed.as_secs_f64(), outcome.label(), Some(best.score));
        info!(
            matched = best.matched_index,
            score = best.score,
            outcome = outcome.label(),
            latency_ms = elapsed.as_millis() as u64,
            "Question answered"
        );

        Ok(outcome)
    }

    async fn best_match(&self, question: &str) -> Result<QueryResult> {
        let query = self.embed_query(question).await?;
        let query = normalize_one(&query);

        self.knowledge
            .index()
            .search(&query, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal {
                message: "search over a non-empty index returned nothing".to_string(),
            })
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        let timeout = self.settings.embed_timeout;
        let texts = [question.to_string()];

        let call = async {
            let _permit = self.permits.acquire().await.map_err(|_| AppError::ServiceUnavailable {
                message: "embedding pool closed".to_string(),
            })?;
            self.embedder.embed_batch(&texts).await
        };

        let mut vectors = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| AppError::EmbeddingTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        if vectors.len() != 1 {
            return Err(AppError::EmbeddingError {
                message: format!("provider returned {} vectors for 1 question", vectors.len()),
            });
        }
        Ok(vectors.swap_remove(0))
    }
}
