/// Disk-based blob cache
use crate::{
    blob_store::{BlobMetadata, BlobRecord, DerivativeKey},
    content_id::ContentId,
    error::{BlobError, BlobResult},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Disk cache backend
///
/// Everything lives flat in one directory, named after the CID:
/// - {cid}.json: serialized metadata
/// - {cid}.blob: raw bytes
/// - {cid}.{width}x{height}px.{format}: derivatives
#[derive(Debug, Clone)]
pub struct DiskBlobCache {
    base_path: PathBuf,
}

impl DiskBlobCache {
    /// Create a cache rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn metadata_path(&self, cid: &ContentId) -> PathBuf {
        self.base_path.join(format!("{}.json", cid))
    }

    fn blob_path(&self, cid: &ContentId) -> PathBuf {
        self.base_path.join(format!("{}.blob", cid))
    }

    fn derivative_path(&self, key: &DerivativeKey) -> PathBuf {
        self.base_path.join(key.file_name())
    }

    /// Load the metadata record for `cid`
    ///
    /// Returns `None` when nothing is cached or the record was written with
    /// an older layout. Bytes are not read here.
    pub async fn load(&self, cid: &ContentId) -> BlobResult<Option<BlobRecord>> {
        let path = self.metadata_path(cid);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BlobError::CacheReadError(format!(
                    "Failed to read metadata {}: {}",
                    cid, e
                )))
            }
        };

        let meta: BlobMetadata = serde_json::from_slice(&raw).map_err(|e| {
            BlobError::CacheReadError(format!("Invalid metadata for {}: {}", cid, e))
        })?;

        if !meta.is_fresh() {
            tracing::debug!(cid = %cid, version = meta.version, "stale cache record");
            return Ok(None);
        }

        Ok(Some(BlobRecord::cold(cid.clone(), meta)))
    }

    /// Read the raw bytes of a cached record
    ///
    /// The length must match the recorded size; anything else means a
    /// partial or corrupted file.
    pub async fn load_data(&self, record: &BlobRecord) -> BlobResult<Bytes> {
        let path = self.blob_path(&record.cid);
        let data = fs::read(&path).await.map_err(|e| {
            BlobError::CacheReadError(format!("Failed to read blob {}: {}", record.cid, e))
        })?;

        if data.len() as u64 != record.meta.size {
            tracing::warn!(
                cid = %record.cid,
                expected = record.meta.size,
                actual = data.len(),
                "size mismatch in cached blob"
            );
            return Err(BlobError::SizeMismatch {
                expected: record.meta.size,
                actual: data.len() as u64,
            });
        }

        Ok(Bytes::from(data))
    }

    /// Persist a verified blob
    ///
    /// Bytes are written before metadata, so a visible metadata file always
    /// has its complete bytes next to it.
    pub async fn save(&self, record: &BlobRecord, data: &[u8]) -> BlobResult<()> {
        self.ensure_dir().await?;

        let index = serde_json::to_vec_pretty(&record.meta).map_err(|e| {
            BlobError::CacheWriteError(format!("Failed to encode metadata: {}", e))
        })?;

        write_atomic(&self.blob_path(&record.cid), data).await?;
        write_atomic(&self.metadata_path(&record.cid), &index).await?;

        Ok(())
    }

    /// Load a cached derivative
    pub async fn load_derivative(&self, key: &DerivativeKey) -> BlobResult<Option<Bytes>> {
        match fs::read(self.derivative_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::CacheReadError(format!(
                "Failed to read derivative {}: {}",
                key.file_name(),
                e
            ))),
        }
    }

    /// Persist a derivative
    pub async fn save_derivative(&self, key: &DerivativeKey, data: &[u8]) -> BlobResult<()> {
        self.ensure_dir().await?;
        write_atomic(&self.derivative_path(key), data).await
    }

    /// Ensure the cache directory exists
    async fn ensure_dir(&self) -> BlobResult<()> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            BlobError::CacheWriteError(format!("Failed to create cache directory: {}", e))
        })
    }
}

/// Write `data` to a unique temporary file beside `path`, then rename it
/// into place
async fn write_atomic(path: &Path, data: &[u8]) -> BlobResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BlobError::CacheWriteError(format!("Invalid cache path {:?}", path)))?;
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&tmp_path, data).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(BlobError::CacheWriteError(format!(
            "Failed to write {}: {}",
            file_name, e
        )));
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(BlobError::CacheWriteError(format!(
            "Failed to move {} into place: {}",
            file_name, e
        )));
    }

    Ok(())
}
