//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with latency histograms and
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all LazyMail metrics
pub const METRICS_PREFIX: &str = "lazymail";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 30.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    describe_counter!(
        format!("{}_extraction_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Query extractions that fell back to their default"
    );

    describe_counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Question pipeline runs by final stage"
    );

    describe_counter!(
        format!("{}_documents_indexed_total", METRICS_PREFIX),
        Unit::Count,
        "Documents written to the index"
    );

    describe_counter!(
        format!("{}_documents_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Documents skipped because they were already indexed"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    describe_histogram!(
        format!("{}_context_documents", METRICS_PREFIX),
        Unit::Count,
        "Documents included in a generation context"
    );

    describe_histogram!(
        format!("{}_context_tokens", METRICS_PREFIX),
        Unit::Count,
        "Tokens spent on documents in a generation context"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, reranked: bool, result_count: usize) {
    let mode = if reranked { "reranked" } else { "hybrid" };

    counter!(format!("{}_search_queries_total", METRICS_PREFIX), "mode" => mode).increment(1);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX), "mode" => mode)
        .record(duration_secs);

    gauge!(format!("{}_search_results_count", METRICS_PREFIX), "mode" => mode)
        .set(result_count as f64);
}

/// Record that one extraction axis fell back to its default
pub fn record_extraction_fallback(axis: &'static str) {
    counter!(format!("{}_extraction_fallbacks_total", METRICS_PREFIX), "axis" => axis)
        .increment(1);
}

/// Record the stage a question pipeline run ended in
pub fn record_pipeline_run(stage: &str) {
    counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
        tracing::trace!(model, batch_size, duration_secs, "Embedding batch complete");
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record indexing metrics
pub fn record_indexing(tenant_id: &str, indexed: usize, skipped: usize) {
    counter!(
        format!("{}_documents_indexed_total", METRICS_PREFIX),
        "tenant" => tenant_id.to_string()
    )
    .increment(indexed as u64);

    counter!(
        format!("{}_documents_skipped_total", METRICS_PREFIX),
        "tenant" => tenant_id.to_string()
    )
    .increment(skipped as u64);
}

/// Record the size of an assembled context
pub fn record_context(documents: usize, tokens: usize) {
    histogram!(format!("{}_context_documents", METRICS_PREFIX)).record(documents as f64);
    histogram!(format!("{}_context_tokens", METRICS_PREFIX)).record(tokens as f64);
}
