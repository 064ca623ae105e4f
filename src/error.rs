/// Unified error types for the blob cache pipeline
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the blob pipeline
///
/// Cloneable so that every caller joined on a single in-flight acquisition
/// receives the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// Malformed or non-canonical content identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Bad query parameters (unknown format, unparsable width)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Repository directory could not be reached or answered garbage
    #[error("Repository locator unavailable: {0}")]
    LocatorUnavailable(String),

    /// Identity has no known hosting endpoint
    #[error("Repository location not found: {0}")]
    LocatorNotFound(String),

    /// Transport failure or non-success status from the hosting endpoint
    #[error("Fetch failed{}: {message}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    FetchTransportError {
        status: Option<u16>,
        message: String,
    },

    /// Hosting endpoint answered with a structured XRPC error
    #[error("Remote error {error}: {}", .message.as_deref().unwrap_or("no message"))]
    FetchRemoteError {
        status: u16,
        error: String,
        message: Option<String>,
    },

    /// Fetched bytes do not hash to the requested identifier
    #[error("Integrity mismatch: expected digest {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Cached metadata or bytes could not be read
    #[error("Cache read error: {0}")]
    CacheReadError(String),

    /// Cached metadata or bytes could not be written
    #[error("Cache write error: {0}")]
    CacheWriteError(String),

    /// Recorded size disagrees with the bytes on disk
    #[error("Size mismatch: metadata records {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Source format cannot be converted into the requested format
    #[error("Unsupported source format {source_type} for {target}")]
    TranscodeUnsupportedFormat { source_type: String, target: String },

    /// Decoder or encoder failure while producing a derivative
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BlobError {
    /// Whether the failure means the content could not be resolved at all
    pub fn is_not_found(&self) -> bool {
        match self {
            BlobError::InvalidIdentifier(_)
            | BlobError::InvalidRequest(_)
            | BlobError::LocatorNotFound(_) => true,
            BlobError::FetchRemoteError { status, error, .. } => {
                (400..500).contains(status)
                    || error == "BlobNotFound"
                    || error == "RepoNotFound"
            }
            BlobError::FetchTransportError {
                status: Some(status),
                ..
            } => *status == 400 || *status == 404,
            _ => false,
        }
    }

    /// Whether the failure came from the cache layer and can be recovered
    /// by acquiring the blob again
    pub fn is_cache_failure(&self) -> bool {
        matches!(
            self,
            BlobError::CacheReadError(_) | BlobError::SizeMismatch { .. }
        )
    }

    /// Short label used for metrics and event fields
    pub fn kind(&self) -> &'static str {
        match self {
            BlobError::InvalidIdentifier(_) => "invalid_identifier",
            BlobError::InvalidRequest(_) => "invalid_request",
            BlobError::LocatorUnavailable(_) => "locator_unavailable",
            BlobError::LocatorNotFound(_) => "locator_not_found",
            BlobError::FetchTransportError { .. } => "fetch_transport",
            BlobError::FetchRemoteError { .. } => "fetch_remote",
            BlobError::IntegrityMismatch { .. } => "integrity_mismatch",
            BlobError::CacheReadError(_) => "cache_read",
            BlobError::CacheWriteError(_) => "cache_write",
            BlobError::SizeMismatch { .. } => "size_mismatch",
            BlobError::TranscodeUnsupportedFormat { .. } => "transcode_unsupported",
            BlobError::TranscodeFailed(_) => "transcode_failed",
            BlobError::Config(_) => "config",
            BlobError::Internal(_) => "internal",
        }
    }
}

/// XRPC-style error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct XrpcErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert BlobError to HTTP response
impl IntoResponse for BlobError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = if self.is_not_found() {
            (StatusCode::NOT_FOUND, "NotFound", self.to_string())
        } else {
            match self {
                BlobError::LocatorUnavailable(_)
                | BlobError::FetchTransportError { .. }
                | BlobError::FetchRemoteError { .. }
                | BlobError::IntegrityMismatch { .. } => (
                    StatusCode::BAD_GATEWAY,
                    "UpstreamError",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                ),
            }
        };

        let body = Json(XrpcErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for blob pipeline operations
pub type BlobResult<T> = Result<T, BlobError>;
