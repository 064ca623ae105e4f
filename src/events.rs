/// Pipeline events
///
/// The blob pipeline reports what it does through an injected observer
/// instead of logging inline, so logging and metrics stay out of its
/// control flow.
use std::sync::Arc;

/// Something the pipeline did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Fresh record found on disk
    CacheHit { cid: String },
    /// No fresh record on disk
    CacheMiss { cid: String },
    /// Cached record could not be used and the blob will be acquired again
    CacheRecovered { cid: String, error: String },
    /// Identity resolved to a hosting endpoint
    Located {
        identity: String,
        did: String,
        endpoint: String,
    },
    /// Retrieval call issued
    FetchAttempted { cid: String, endpoint: String },
    /// Retrieval call returned a payload
    Fetched {
        cid: String,
        size: u64,
        duration_ms: u64,
    },
    /// Retrieval or location failed
    FetchFailed { cid: String, kind: &'static str },
    /// Fetched bytes matched their identifier
    Verified { cid: String, size: u64 },
    /// Fetched bytes did not match their identifier
    IntegrityFailed {
        cid: String,
        expected: String,
        actual: String,
    },
    /// Verified record written to disk
    Persisted { cid: String, mime: String, size: u64 },
    /// Derivative served from disk
    DerivativeHit { file: String },
    /// Derivative produced by the transcoder
    TranscodePerformed {
        file: String,
        format: &'static str,
        size: u64,
    },
    /// Transcoder refused or failed
    TranscodeFailed {
        file: String,
        format: &'static str,
        kind: &'static str,
    },
}

/// Receives pipeline events
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Observer that logs every event through `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::CacheHit { cid } => tracing::debug!(cid = %cid, "cache hit"),
            PipelineEvent::CacheMiss { cid } => tracing::debug!(cid = %cid, "cache miss"),
            PipelineEvent::CacheRecovered { cid, error } => {
                tracing::warn!(cid = %cid, error = %error, "cached blob unusable, re-acquiring")
            }
            PipelineEvent::Located {
                identity,
                did,
                endpoint,
            } => tracing::debug!(identity = %identity, did = %did, endpoint = %endpoint, "repository located"),
            PipelineEvent::FetchAttempted { cid, endpoint } => {
                tracing::info!(cid = %cid, endpoint = %endpoint, "fetching blob")
            }
            PipelineEvent::Fetched {
                cid,
                size,
                duration_ms,
            } => tracing::debug!(cid = %cid, size = size, duration_ms = duration_ms, "blob fetched"),
            PipelineEvent::FetchFailed { cid, kind } => {
                tracing::warn!(cid = %cid, kind = %kind, "blob acquisition failed")
            }
            PipelineEvent::Verified { cid, size } => {
                tracing::debug!(cid = %cid, size = size, "blob verified")
            }
            PipelineEvent::IntegrityFailed {
                cid,
                expected,
                actual,
            } => tracing::error!(
                cid = %cid,
                expected = %expected,
                actual = %actual,
                "hash of fetched blob does not match cid"
            ),
            PipelineEvent::Persisted { cid, mime, size } => {
                tracing::info!(cid = %cid, mime = %mime, size = size, "blob cached")
            }
            PipelineEvent::DerivativeHit { file } => {
                tracing::debug!(file = %file, "derivative cache hit")
            }
            PipelineEvent::TranscodePerformed { file, format, size } => {
                tracing::info!(file = %file, format = %format, size = size, "derivative created")
            }
            PipelineEvent::TranscodeFailed { file, format, kind } => {
                tracing::warn!(file = %file, format = %format, kind = %kind, "transcode failed")
            }
        }
    }
}

/// Fans events out to several observers
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl PipelineObserver for ObserverSet {
    fn on_event(&self, event: &PipelineEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}
