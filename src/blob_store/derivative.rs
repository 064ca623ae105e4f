/// Derivative cache - transcoded variants of verified blobs
use crate::{
    blob_store::{
        disk::DiskBlobCache, singleflight::SingleFlight, DerivativeKey, DerivativeRecord,
    },
    error::{BlobError, BlobResult},
    events::{PipelineEvent, PipelineObserver},
    transcode::{TranscodeRequest, Transcoder},
};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

/// Serves derivatives from disk and produces missing ones
///
/// At most one transcode per key runs at a time; concurrent requests for
/// the same key share its result.
pub struct DerivativeCache {
    disk: DiskBlobCache,
    transcoder: Arc<dyn Transcoder>,
    observer: Arc<dyn PipelineObserver>,
    flights: SingleFlight<DerivativeKey, DerivativeRecord>,
}

impl DerivativeCache {
    pub fn new(
        disk: DiskBlobCache,
        transcoder: Arc<dyn Transcoder>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            disk,
            transcoder,
            observer,
            flights: SingleFlight::new(),
        }
    }

    /// Return the derivative for `key`, transcoding it on first request
    ///
    /// `source` yields the verified original bytes and is only called when
    /// the derivative is not on disk yet. `source_type` is the content type
    /// handed to the transcoder.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: DerivativeKey,
        source_type: &str,
        source: F,
    ) -> BlobResult<DerivativeRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BlobResult<Bytes>>,
    {
        let content_type = key.format.content_type().ok_or_else(|| {
            BlobError::Internal("raw output does not go through the derivative cache".to_string())
        })?;

        if let Some(data) = self.cached(&key).await {
            return Ok(DerivativeRecord {
                data,
                content_type: content_type.to_string(),
            });
        }

        self.flights
            .run(key.clone(), || async {
                // Another flight may have finished between our check and now
                if let Ok(Some(data)) = self.disk.load_derivative(&key).await {
                    return Ok(DerivativeRecord {
                        data,
                        content_type: content_type.to_string(),
                    });
                }

                let data = source().await?;
                let produced = self
                    .transcoder
                    .transcode(TranscodeRequest {
                        format: key.format,
                        width: key.width,
                        height: key.height,
                        data,
                        content_type: source_type.to_string(),
                    })
                    .await;

                let produced = match produced {
                    Ok(produced) => produced,
                    Err(e) => {
                        self.observer.on_event(&PipelineEvent::TranscodeFailed {
                            file: key.file_name(),
                            format: key.format.extension(),
                            kind: e.kind(),
                        });
                        return Err(e);
                    }
                };

                self.disk.save_derivative(&key, &produced).await?;
                self.observer.on_event(&PipelineEvent::TranscodePerformed {
                    file: key.file_name(),
                    format: key.format.extension(),
                    size: produced.len() as u64,
                });

                Ok(DerivativeRecord {
                    data: produced,
                    content_type: content_type.to_string(),
                })
            })
            .await
    }

    /// Derivative bytes on disk, treating unreadable files as absent
    async fn cached(&self, key: &DerivativeKey) -> Option<Bytes> {
        match self.disk.load_derivative(key).await {
            Ok(Some(data)) => {
                self.observer.on_event(&PipelineEvent::DerivativeHit {
                    file: key.file_name(),
                });
                Some(data)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(file = %key.file_name(), error = %e, "unreadable derivative, regenerating");
                None
            }
        }
    }
}
