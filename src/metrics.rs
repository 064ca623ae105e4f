/// Metrics and telemetry for the blob cache
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Blob and derivative cache hit/miss rates
/// - Remote fetch outcomes
/// - Integrity failures and transcodes

use crate::events::{PipelineEvent, PipelineObserver};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by route and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_http_requests_total",
        "Total number of HTTP requests",
        &["route", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "blobd_http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Cache hits by cache type
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_cache_hits_total",
        "Total number of cache hits",
        &["cache_type"]
    )
    .unwrap();

    /// Cache misses by cache type
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_cache_misses_total",
        "Total number of cache misses",
        &["cache_type"]
    )
    .unwrap();

    /// Cached records that had to be acquired again
    pub static ref CACHE_RECOVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_cache_recoveries_total",
        "Total number of unusable cache entries re-acquired",
        &["cache_type"]
    )
    .unwrap();

    // ========== Fetch Metrics ==========

    /// Remote fetches by outcome
    pub static ref FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_fetches_total",
        "Total number of remote blob fetches",
        &["outcome"]
    )
    .unwrap();

    /// Remote fetch duration in seconds
    pub static ref FETCH_DURATION_SECONDS: Histogram = register_histogram!(
        "blobd_fetch_duration_seconds",
        "Remote blob fetch latencies in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Blobs whose hash did not match their cid
    pub static ref INTEGRITY_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "blobd_integrity_failures_total",
        "Total number of fetched blobs failing verification"
    )
    .unwrap();

    /// Bytes written to the blob cache
    pub static ref BLOB_BYTES_CACHED: IntGauge = register_int_gauge!(
        "blobd_blob_bytes_cached",
        "Bytes of verified blobs cached by this process"
    )
    .unwrap();

    // ========== Derivative Metrics ==========

    /// Transcodes by target format and outcome
    pub static ref TRANSCODES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blobd_transcodes_total",
        "Total number of derivative transcodes",
        &["format", "outcome"]
    )
    .unwrap();
}

/// Record an HTTP request
pub fn record_http_request(route: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record a cache access
pub fn record_cache_access(cache_type: &str, hit: bool) {
    if hit {
        CACHE_HITS_TOTAL.with_label_values(&[cache_type]).inc();
    } else {
        CACHE_MISSES_TOTAL.with_label_values(&[cache_type]).inc();
    }
}

/// Render all registered metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Observer turning pipeline events into metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsObserver;

impl PipelineObserver for MetricsObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::CacheHit { .. } => record_cache_access("blob", true),
            PipelineEvent::CacheMiss { .. } => record_cache_access("blob", false),
            PipelineEvent::CacheRecovered { .. } => {
                CACHE_RECOVERIES_TOTAL.with_label_values(&["blob"]).inc()
            }
            PipelineEvent::Located { .. } => {}
            PipelineEvent::FetchAttempted { .. } => {
                FETCHES_TOTAL.with_label_values(&["attempted"]).inc()
            }
            PipelineEvent::Fetched { duration_ms, .. } => {
                FETCH_DURATION_SECONDS.observe(*duration_ms as f64 / 1000.0)
            }
            PipelineEvent::FetchFailed { kind, .. } => {
                FETCHES_TOTAL.with_label_values(&[*kind]).inc()
            }
            PipelineEvent::Verified { .. } => FETCHES_TOTAL.with_label_values(&["verified"]).inc(),
            PipelineEvent::IntegrityFailed { .. } => INTEGRITY_FAILURES_TOTAL.inc(),
            PipelineEvent::Persisted { size, .. } => BLOB_BYTES_CACHED.add(*size as i64),
            PipelineEvent::DerivativeHit { .. } => record_cache_access("derivative", true),
            PipelineEvent::TranscodePerformed { format, .. } => {
                record_cache_access("derivative", false);
                TRANSCODES_TOTAL.with_label_values(&[*format, "ok"]).inc();
            }
            PipelineEvent::TranscodeFailed { format, kind, .. } => {
                TRANSCODES_TOTAL.with_label_values(&[*format, *kind]).inc()
            }
        }
    }
}
