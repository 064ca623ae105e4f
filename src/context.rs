/// Application context and dependency injection
use crate::{
    blob_store::{BlobStore, BlobStoreConfig, XrpcBlobFetcher},
    config::{LocatorKind, ServerConfig},
    error::{BlobError, BlobResult},
    events::{ObserverSet, TracingObserver},
    identity::{DidDocumentLocator, DirectoryLocator, LocatorConfig, RepoLocator},
    metrics::MetricsObserver,
    transcode::ImageTranscoder,
};
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub blob_store: Arc<BlobStore>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> BlobResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let locator_config = LocatorConfig {
            user_agent: config.fetch.user_agent.clone(),
            timeout: config.fetch.timeout(),
        };
        let locator: Arc<dyn RepoLocator> = match config.locator.kind {
            LocatorKind::Directory => Arc::new(DirectoryLocator::new(
                config.locator.directory_url.clone(),
                locator_config,
            )?),
            LocatorKind::DidDoc => Arc::new(DidDocumentLocator::new(
                config.locator.plc_url.clone(),
                locator_config,
            )?),
        };

        let fetcher = Arc::new(XrpcBlobFetcher::new(
            &config.fetch.user_agent,
            config.fetch.timeout(),
        )?);

        let observer = ObserverSet::new()
            .with(Arc::new(TracingObserver))
            .with(Arc::new(MetricsObserver));

        let blob_store = Arc::new(BlobStore::new(
            BlobStoreConfig {
                location: config.storage.blob_directory.clone(),
            },
            locator,
            fetcher,
            Arc::new(ImageTranscoder::new(config.transcode.max_dimension)),
            Arc::new(observer),
        ));

        tracing::info!(
            locator = ?config.locator.kind,
            blobs = %config.storage.blob_directory.display(),
            "application context ready"
        );

        Ok(Self::with_store(config, blob_store))
    }

    /// Context around an already built blob store
    pub fn with_store(config: ServerConfig, blob_store: Arc<BlobStore>) -> Self {
        Self {
            config: Arc::new(config),
            blob_store,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> BlobResult<()> {
        let dirs = [
            &config.storage.data_directory,
            &config.storage.blob_directory,
        ];

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    BlobError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
