/// Blob Store Manager
///
/// Coordinates the blob pipeline: identifier validation, disk cache lookup,
/// repository location, remote fetch, integrity verification, persistence
/// and derivative production.
use crate::{
    blob_store::{
        derivative::DerivativeCache, disk::DiskBlobCache, fetcher::BlobFetcher, mime,
        singleflight::SingleFlight, BlobInspection, BlobMetadata, BlobOutput, BlobRecord,
        BlobSource, DerivativeKey, OutputFormat, SCHEMA_VERSION,
    },
    content_id::ContentId,
    error::{BlobError, BlobResult},
    events::{PipelineEvent, PipelineObserver},
    identity::RepoLocator,
    transcode::Transcoder,
};
use bytes::Bytes;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Blob store configuration
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Directory holding metadata, blobs and derivatives
    pub location: PathBuf,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("./data/blobs"),
        }
    }
}

/// Requested representation of a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// Target width, 0 for no resize
    pub width: u32,
    /// Target height, 0 for no resize
    pub height: u32,
}

/// Main blob store manager
pub struct BlobStore {
    disk: DiskBlobCache,
    locator: Arc<dyn RepoLocator>,
    fetcher: Arc<dyn BlobFetcher>,
    derivatives: DerivativeCache,
    observer: Arc<dyn PipelineObserver>,
    acquisitions: SingleFlight<ContentId, Arc<BlobRecord>>,
}

impl BlobStore {
    /// Create a new blob store
    pub fn new(
        config: BlobStoreConfig,
        locator: Arc<dyn RepoLocator>,
        fetcher: Arc<dyn BlobFetcher>,
        transcoder: Arc<dyn Transcoder>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        let disk = DiskBlobCache::new(config.location);
        let derivatives = DerivativeCache::new(disk.clone(), transcoder, Arc::clone(&observer));

        Self {
            disk,
            locator,
            fetcher,
            derivatives,
            observer,
            acquisitions: SingleFlight::new(),
        }
    }

    /// Get the verified record for `cid`, acquiring it on a cache miss
    ///
    /// `identity` is only consulted when the blob has to be fetched.
    pub async fn get(&self, identity: &str, cid: &str) -> BlobResult<Arc<BlobRecord>> {
        let cid = ContentId::parse(cid)?;

        if let Some(record) = self.lookup(&cid).await {
            return Ok(record);
        }

        self.acquire(identity, &cid, false).await
    }

    /// Metadata of a blob, acquiring it if needed
    pub async fn inspect(&self, identity: &str, cid: &str) -> BlobResult<BlobInspection> {
        let record = self.get(identity, cid).await?;
        Ok(BlobInspection::from(record.as_ref()))
    }

    /// Produce the requested representation of `record`
    ///
    /// If the cached bytes turn out to be unreadable or truncated, the blob
    /// is acquired again once and the request continues with fresh bytes.
    pub async fn output(
        &self,
        identity: &str,
        record: &BlobRecord,
        options: OutputOptions,
    ) -> BlobResult<BlobOutput> {
        match self.output_from(record, options).await {
            Err(e) if e.is_cache_failure() => {
                self.observer.on_event(&PipelineEvent::CacheRecovered {
                    cid: record.cid.to_string(),
                    error: e.to_string(),
                });
                let fresh = self.acquire(identity, &record.cid, true).await?;
                self.output_from(&fresh, options).await
            }
            result => result,
        }
    }

    async fn output_from(
        &self,
        record: &BlobRecord,
        options: OutputOptions,
    ) -> BlobResult<BlobOutput> {
        if options.format == OutputFormat::Raw {
            let data = self.data(record).await?;
            return Ok(BlobOutput {
                data,
                content_type: record.meta.mime.clone(),
            });
        }

        let key = DerivativeKey {
            cid: record.cid.clone(),
            format: options.format,
            width: options.width,
            height: options.height,
        };
        let derivative = self
            .derivatives
            .get_or_create(key, source_type(&record.meta), || self.data(record))
            .await?;

        Ok(derivative.into())
    }

    /// Raw bytes of a record, read from disk on first use
    async fn data(&self, record: &BlobRecord) -> BlobResult<Bytes> {
        record
            .data_or_load(|| self.disk.load_data(record))
            .await
    }

    /// Fresh record on disk, if any
    ///
    /// An unreadable record is reported and treated as a miss.
    async fn lookup(&self, cid: &ContentId) -> Option<Arc<BlobRecord>> {
        match self.disk.load(cid).await {
            Ok(Some(record)) => {
                self.observer.on_event(&PipelineEvent::CacheHit {
                    cid: cid.to_string(),
                });
                Some(Arc::new(record))
            }
            Ok(None) => {
                self.observer.on_event(&PipelineEvent::CacheMiss {
                    cid: cid.to_string(),
                });
                None
            }
            Err(e) => {
                self.observer.on_event(&PipelineEvent::CacheRecovered {
                    cid: cid.to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Acquire `cid`, joining an acquisition already in flight
    ///
    /// Unless `force` is set, the disk is checked again first, since another
    /// flight may have stored the blob in the meantime.
    async fn acquire(
        &self,
        identity: &str,
        cid: &ContentId,
        force: bool,
    ) -> BlobResult<Arc<BlobRecord>> {
        self.acquisitions
            .run(cid.clone(), || async move {
                if !force {
                    if let Ok(Some(record)) = self.disk.load(cid).await {
                        return Ok(Arc::new(record));
                    }
                }
                self.fetch_and_store(identity, cid).await
            })
            .await
    }

    /// Locate, fetch, verify and persist
    async fn fetch_and_store(
        &self,
        identity: &str,
        cid: &ContentId,
    ) -> BlobResult<Arc<BlobRecord>> {
        let fail = |e: &BlobError| {
            self.observer.on_event(&PipelineEvent::FetchFailed {
                cid: cid.to_string(),
                kind: e.kind(),
            });
        };

        let location = self.locator.locate(identity).await.inspect_err(fail)?;
        let endpoint = location.primary_endpoint().to_string();
        self.observer.on_event(&PipelineEvent::Located {
            identity: identity.to_string(),
            did: location.did.clone(),
            endpoint: endpoint.clone(),
        });

        self.observer.on_event(&PipelineEvent::FetchAttempted {
            cid: cid.to_string(),
            endpoint: endpoint.clone(),
        });
        let started = Instant::now();
        let fetched = self
            .fetcher
            .fetch(&endpoint, &location.did, cid)
            .await
            .inspect_err(fail)?;
        let size = fetched.data.len() as u64;
        self.observer.on_event(&PipelineEvent::Fetched {
            cid: cid.to_string(),
            size,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        if let Err(e) = cid.verify(&fetched.data) {
            if let BlobError::IntegrityMismatch { expected, actual } = &e {
                self.observer.on_event(&PipelineEvent::IntegrityFailed {
                    cid: cid.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            return Err(e);
        }
        self.observer.on_event(&PipelineEvent::Verified {
            cid: cid.to_string(),
            size,
        });

        let meta = BlobMetadata {
            size,
            content_type: fetched.content_type,
            mime: mime::sniff(&fetched.data).to_string(),
            source: BlobSource {
                pds: endpoint,
                did: location.did,
                url: fetched.url,
            },
            time: Utc::now(),
            version: SCHEMA_VERSION,
        };
        let record = BlobRecord::with_data(cid.clone(), meta, fetched.data.clone());
        self.disk.save(&record, &fetched.data).await?;

        self.observer.on_event(&PipelineEvent::Persisted {
            cid: cid.to_string(),
            mime: record.meta.mime.clone(),
            size,
        });

        Ok(Arc::new(record))
    }
}

/// Content type handed to the transcoder: the sniffed type unless sniffing
/// gave up, then whatever the hosting endpoint declared
fn source_type(meta: &BlobMetadata) -> &str {
    if meta.mime == mime::OCTET_STREAM {
        &meta.content_type
    } else {
        &meta.mime
    }
}
