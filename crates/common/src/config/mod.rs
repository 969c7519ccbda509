//! Configuration management for AnswerForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Similarity score a match must reach to be answered.
pub const DEFAULT_THRESHOLD: f32 = 0.70;

/// Message streamed when no corpus entry is close enough.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Sorry, I'm not sure how to answer that.";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Question/answer catalog location
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Matching and streaming behaviour
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// Path to the JSON array of `{question, answer}` records
    #[serde(default = "default_corpus_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: http (semantic model sidecar), hashing (lexical, offline only)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL of an OpenAI-compatible embeddings endpoint serving `model`
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension for the hashing provider
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent embedding calls allowed across all queries
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for an answer to be returned
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Pause between streamed words, in milliseconds
    #[serde(default = "default_word_delay")]
    pub word_delay_ms: u64,

    /// Text streamed when no confident match exists
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_corpus_path() -> String { "data/questions.json".to_string() }
fn default_embedding_provider() -> String { "http".to_string() }
fn default_api_base() -> String { "http://localhost:8080/v1".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 10 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_max_concurrent() -> usize { 8 }
fn default_threshold() -> f32 { DEFAULT_THRESHOLD }
fn default_word_delay() -> u64 { 100 }
fn default_fallback_message() -> String { DEFAULT_FALLBACK_MESSAGE.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "answerforge".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__THRESHOLD=0.8
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.retrieval.threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(AppError::Configuration {
                message: format!("retrieval.threshold must lie in [-1, 1], got {}", threshold),
            });
        }
        if self.embedding.batch_size == 0 {
            return Err(AppError::Configuration {
                message: "embedding.batch_size must be positive".to_string(),
            });
        }
        if self.embedding.max_concurrent == 0 {
            return Err(AppError::Configuration {
                message: "embedding.max_concurrent must be positive".to_string(),
            });
        }
        if self.retrieval.fallback_message.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "retrieval.fallback_message must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get embedding call timeout as Duration
    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding.timeout_secs)
    }

    /// Get inter-word streaming delay as Duration
    pub fn word_delay(&self) -> Duration {
        Duration::from_millis(self.retrieval.word_delay_ms)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self { path: default_corpus_path() }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: default_api_base(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            word_delay_ms: default_word_delay(),
            fallback_message: default_fallback_message(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.retrieval.threshold, 0.70);
        assert_eq!(config.word_delay(), Duration::from_millis(100));
        assert_eq!(config.corpus.path, "data/questions.json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.retrieval.threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = AppConfig::default();
        config.embedding.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"retrieval": {"threshold": 0.8}}"#).unwrap();
        assert_eq!(config.retrieval.threshold, 0.8);
        assert_eq!(config.retrieval.word_delay_ms, 100);
        assert_eq!(config.embedding.provider, "http");
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
    }
}
