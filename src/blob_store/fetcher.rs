/// Blob retrieval from hosting endpoints (com.atproto.sync.getBlob)
use crate::{
    blob_store::mime::OCTET_STREAM,
    content_id::ContentId,
    error::{BlobError, BlobResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Url};
use serde::Deserialize;
use std::time::Duration;

/// Raw payload returned by a hosting endpoint
#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub data: Bytes,
    /// Content type as declared by the endpoint
    pub content_type: String,
    /// URL the blob was retrieved from
    pub url: String,
}

/// Retrieves blobs from hosting endpoints
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Issue one retrieval call, without retrying
    async fn fetch(&self, endpoint: &str, did: &str, cid: &ContentId) -> BlobResult<FetchedBlob>;
}

/// XRPC error body
#[derive(Debug, Deserialize)]
struct XrpcError {
    error: String,
    message: Option<String>,
}

/// Fetcher speaking the XRPC sync API over HTTP
#[derive(Clone)]
pub struct XrpcBlobFetcher {
    http_client: reqwest::Client,
}

impl XrpcBlobFetcher {
    /// Create a fetcher whose calls are bounded by `timeout`
    pub fn new(user_agent: &str, timeout: Duration) -> BlobResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| BlobError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// {endpoint}/xrpc/com.atproto.sync.getBlob?did={did}&cid={cid}
    fn blob_url(endpoint: &str, did: &str, cid: &ContentId) -> BlobResult<Url> {
        let base = endpoint.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/xrpc/com.atproto.sync.getBlob", base)).map_err(
            |e| BlobError::FetchTransportError {
                status: None,
                message: format!("Invalid hosting endpoint {}: {}", endpoint, e),
            },
        )?;
        url.query_pairs_mut()
            .append_pair("did", did)
            .append_pair("cid", &cid.to_string());
        Ok(url)
    }
}

#[async_trait]
impl BlobFetcher for XrpcBlobFetcher {
    async fn fetch(&self, endpoint: &str, did: &str, cid: &ContentId) -> BlobResult<FetchedBlob> {
        let url = Self::blob_url(endpoint, did, cid)?;

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BlobError::FetchTransportError {
                status: e.status().map(|s| s.as_u16()),
                message: format!("Request to {} failed: {}", endpoint, e),
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| BlobError::FetchTransportError {
                status: Some(status.as_u16()),
                message: format!("Failed to read body from {}: {}", endpoint, e),
            })?;

        // Structured error payloads are never blob content
        if content_type.contains("application/json") {
            if let Ok(err) = serde_json::from_slice::<XrpcError>(&data) {
                if !err.error.is_empty() {
                    return Err(BlobError::FetchRemoteError {
                        status: status.as_u16(),
                        error: err.error,
                        message: err.message,
                    });
                }
            }
        }

        if !status.is_success() {
            return Err(BlobError::FetchTransportError {
                status: Some(status.as_u16()),
                message: format!("{} returned {}", endpoint, status),
            });
        }

        Ok(FetchedBlob {
            data,
            content_type,
            url: url.to_string(),
        })
    }
}
