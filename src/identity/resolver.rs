/// Repository locators - JSON directory and DID document resolution
use crate::{
    error::{BlobError, BlobResult},
    identity::{RepoLocation, RepoLocator},
};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

/// HTTP settings shared by the locators
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// User-Agent header for HTTP requests
    pub user_agent: String,
    /// Deadline for a single lookup
    pub timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("aurora-blobd/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl LocatorConfig {
    fn build_client(&self) -> BlobResult<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| BlobError::Internal(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Append `segment` to the path of `base`, percent-encoding as needed
fn join_segment(base: &str, segment: &str) -> BlobResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| BlobError::Internal(format!("Invalid locator URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| BlobError::Internal(format!("Locator URL cannot be a base: {}", base)))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Issue a GET and map the status to locator errors
async fn get_checked(
    client: &reqwest::Client,
    url: Url,
    identity: &str,
) -> BlobResult<reqwest::Response> {
    let response = client.get(url).send().await.map_err(|e| {
        BlobError::LocatorUnavailable(format!("Lookup of {} failed: {}", identity, e))
    })?;

    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(BlobError::LocatorNotFound(identity.to_string())),
        status => Err(BlobError::LocatorUnavailable(format!(
            "Lookup of {} returned {}",
            identity, status
        ))),
    }
}

/// Directory lookup response
#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    pds: Option<Vec<String>>,
    did: Option<String>,
}

/// Locator backed by a repository directory service
///
/// `GET {base}/{identity}` answers `{"pds": [...], "did": "..."}` for both
/// DIDs and handles.
#[derive(Clone)]
pub struct DirectoryLocator {
    base_url: String,
    http_client: reqwest::Client,
}

impl DirectoryLocator {
    pub fn new(base_url: impl Into<String>, config: LocatorConfig) -> BlobResult<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http_client: config.build_client()?,
        })
    }
}

#[async_trait]
impl RepoLocator for DirectoryLocator {
    async fn locate(&self, identity: &str) -> BlobResult<RepoLocation> {
        let url = join_segment(&self.base_url, identity)?;
        let response = get_checked(&self.http_client, url, identity).await?;

        let body: DirectoryResponse = response.json().await.map_err(|e| {
            BlobError::LocatorUnavailable(format!("Invalid directory response for {}: {}", identity, e))
        })?;

        let endpoints: Vec<String> = body
            .pds
            .unwrap_or_default()
            .into_iter()
            .filter(|e| !e.trim().is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(BlobError::LocatorNotFound(identity.to_string()));
        }

        // Handles resolve to their DID here
        let did = body
            .did
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| identity.to_string());

        Ok(RepoLocation { endpoints, did })
    }
}

/// Service entry of a DID document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    id: String,
    #[serde(rename = "type")]
    service_type: Option<String>,
    service_endpoint: serde_json::Value,
}

/// The parts of a DID document we need
#[derive(Debug, Deserialize)]
struct DidDocument {
    id: String,
    #[serde(default)]
    service: Vec<DidService>,
}

impl DidDocument {
    /// PDS endpoints declared by the document, in document order
    fn pds_endpoints(&self) -> Vec<String> {
        self.service
            .iter()
            .filter(|s| {
                s.id.ends_with("#atproto_pds")
                    || s.service_type.as_deref() == Some("AtprotoPersonalDataServer")
            })
            .filter_map(|s| s.service_endpoint.as_str().map(str::to_string))
            .collect()
    }
}

/// Locator resolving DID documents directly
///
/// Supports did:plc (through the PLC directory) and did:web. Handles are
/// not resolved and report `LocatorNotFound`.
#[derive(Clone)]
pub struct DidDocumentLocator {
    plc_url: String,
    http_client: reqwest::Client,
}

impl DidDocumentLocator {
    pub fn new(plc_url: impl Into<String>, config: LocatorConfig) -> BlobResult<Self> {
        Ok(Self {
            plc_url: plc_url.into(),
            http_client: config.build_client()?,
        })
    }

    /// Where the DID document for `did` lives
    fn document_url(&self, did: &str) -> BlobResult<Url> {
        if did.starts_with("did:plc:") {
            join_segment(&self.plc_url, did)
        } else if let Some(suffix) = did.strip_prefix("did:web:") {
            did_web_url(suffix)
        } else {
            Err(BlobError::LocatorNotFound(format!(
                "Unsupported identity: {}",
                did
            )))
        }
    }
}

/// did:web:example.com -> https://example.com/.well-known/did.json
/// did:web:example.com:user:alice -> https://example.com/user/alice/did.json
fn did_web_url(suffix: &str) -> BlobResult<Url> {
    let mut parts = suffix.split(':');
    let domain = parts
        .next()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| BlobError::LocatorNotFound("Missing domain in did:web".to_string()))?;
    let domain = domain.replace("%3A", ":");
    let path: Vec<&str> = parts.collect();

    let url = if path.is_empty() {
        format!("https://{}/.well-known/did.json", domain)
    } else {
        format!("https://{}/{}/did.json", domain, path.join("/"))
    };
    Url::parse(&url).map_err(|e| BlobError::LocatorNotFound(format!("Invalid did:web: {}", e)))
}

#[async_trait]
impl RepoLocator for DidDocumentLocator {
    async fn locate(&self, identity: &str) -> BlobResult<RepoLocation> {
        let url = self.document_url(identity)?;
        let response = get_checked(&self.http_client, url, identity).await?;

        let doc: DidDocument = response.json().await.map_err(|e| {
            BlobError::LocatorUnavailable(format!("Invalid DID document for {}: {}", identity, e))
        })?;

        let endpoints = doc.pds_endpoints();
        if endpoints.is_empty() {
            return Err(BlobError::LocatorNotFound(identity.to_string()));
        }

        Ok(RepoLocation {
            endpoints,
            did: doc.id,
        })
    }
}
