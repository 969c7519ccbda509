//! Question/answer catalog loaded once at startup

use answerforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One catalog entry. Its identity is its position in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub question: String,
    pub answer: String,
}

impl Record {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered, immutable list of records.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    records: Vec<Record>,
}

impl CorpusStore {
    /// Read and parse a JSON array of `{question, answer}` objects.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| AppError::Corpus {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

        let corpus = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), records = corpus.len(), "Corpus loaded");
        Ok(corpus)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let records: Vec<Record> = serde_json::from_str(raw).map_err(|e| AppError::Corpus {
            message: format!("invalid corpus JSON: {}", e),
        })?;
        Self::from_records(records)
    }

    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        if records.is_empty() {
            return Err(AppError::EmptyCorpus);
        }

        if let Some(position) = records.iter().position(|r| r.question.trim().is_empty()) {
            return Err(AppError::Corpus {
                message: format!("record {} has an empty question", position),
            });
        }

        for (position, record) in records.iter().enumerate() {
            if record.answer.trim().is_empty() {
                tracing::warn!(position, "Corpus record has an empty answer");
            }
        }

        Ok(Self { records })
    }

    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Question texts in corpus order, ready for batch embedding.
    pub fn questions(&self) -> Vec<String> {
        self.records.iter().map(|r| r.question.clone()).collect()
    }
}
