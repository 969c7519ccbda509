//! Metrics and observability utilities
//!
//! Prometheus-style metrics with standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram, Unit,
};

/// Metrics prefix for all AnswerForge metrics
pub const METRICS_PREFIX: &str = "answerforge";

/// Histogram buckets for question latency (in seconds), excluding streaming time
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    10.00,  // 10s
];

/// Buckets for cosine similarity of the best match
pub const SCORE_BUCKETS: &[f64] = &[
    0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95, 1.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Questions answered, by outcome"
    );

    describe_histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time from question receipt to retrieval decision"
    );

    describe_histogram!(
        format!("{}_match_score", METRICS_PREFIX),
        "Cosine similarity of the best corpus match"
    );

    describe_counter!(
        format!("{}_stream_chunks_total", METRICS_PREFIX),
        Unit::Count,
        "Answer chunks emitted to clients"
    );

    describe_gauge!(
        format!("{}_corpus_records", METRICS_PREFIX),
        Unit::Count,
        "Records in the loaded corpus"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider calls"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider errors"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a retrieval decision
pub fn record_question(duration_secs: f64, outcome: &str, score: Option<f32>) {
    counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);

    if let Some(score) = score {
        histogram!(format!("{}_match_score", METRICS_PREFIX)).record(f64::from(score));
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
        tracing::debug!(model, batch_size, duration_secs, "Embedding batch completed");
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to count streamed chunks
pub fn record_stream_chunk() {
    counter!(format!("{}_stream_chunks_total", METRICS_PREFIX)).increment(1);
}

/// Helper to publish corpus size after startup
pub fn record_corpus_size(records: usize) {
    gauge!(format!("{}_corpus_records", METRICS_PREFIX)).set(records as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, SCORE_BUCKETS] {
            let mut prev = f64::NEG_INFINITY;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
        // Default acceptance threshold sits on a bucket edge
        assert!(SCORE_BUCKETS.contains(&0.7));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops and must not panic
        record_question(0.01, "accepted", Some(0.91));
        record_embedding(0.02, "feature-hashing", 4, false);
        record_stream_chunk();
        record_corpus_size(3);
    }
}
