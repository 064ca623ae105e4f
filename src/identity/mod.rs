/// Repository location
///
/// Resolves a decentralized identity (DID or handle) to the hosting
/// endpoints that hold its blobs, plus the canonical DID those endpoints
/// know it by.

pub mod resolver;

pub use resolver::{DidDocumentLocator, DirectoryLocator, LocatorConfig};

use crate::error::BlobResult;
use async_trait::async_trait;
use serde::Serialize;

/// Result of locating a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoLocation {
    /// Hosting endpoints in preference order, never empty
    pub endpoints: Vec<String>,
    /// Canonical identity to use for all further requests
    pub did: String,
}

impl RepoLocation {
    /// The endpoint the pipeline fetches from
    pub fn primary_endpoint(&self) -> &str {
        &self.endpoints[0]
    }
}

/// Resolves identities to hosting endpoints
#[async_trait]
pub trait RepoLocator: Send + Sync {
    /// Locate the repository for `identity`
    ///
    /// Implementations return `LocatorNotFound` rather than an empty
    /// endpoint list.
    async fn locate(&self, identity: &str) -> BlobResult<RepoLocation>;
}
