/// Blob cache data models
use crate::{
    content_id::ContentId,
    error::{BlobError, BlobResult},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::OnceCell;

/// Current layout version of persisted metadata
///
/// Records carrying any other version are treated as a cache miss.
pub const SCHEMA_VERSION: u8 = 1;

/// Where a blob was acquired from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobSource {
    /// Hosting endpoint (PDS) the blob was fetched from
    pub pds: String,
    /// Canonical identity the blob belongs to
    pub did: String,
    /// Exact URL of the retrieval call
    pub url: String,
}

/// Blob metadata persisted next to the raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub size: u64,
    /// Content type declared by the hosting endpoint
    pub content_type: String,
    /// Content type sniffed from the bytes
    pub mime: String,
    pub source: BlobSource,
    pub time: DateTime<Utc>,
    pub version: u8,
}

impl BlobMetadata {
    /// Whether this record was written with the current layout
    pub fn is_fresh(&self) -> bool {
        self.version == SCHEMA_VERSION
    }
}

/// A verified blob: its identifier, metadata and lazily loaded bytes
#[derive(Debug)]
pub struct BlobRecord {
    pub cid: ContentId,
    pub meta: BlobMetadata,
    data: OnceCell<Bytes>,
}

impl BlobRecord {
    /// Record whose bytes are still on disk
    pub fn cold(cid: ContentId, meta: BlobMetadata) -> Self {
        Self {
            cid,
            meta,
            data: OnceCell::new(),
        }
    }

    /// Record for bytes that were just fetched and verified
    pub fn with_data(cid: ContentId, meta: BlobMetadata, data: Bytes) -> Self {
        Self {
            cid,
            meta,
            data: OnceCell::new_with(Some(data)),
        }
    }

    /// Bytes already held in memory, if any
    pub fn loaded_data(&self) -> Option<Bytes> {
        self.data.get().cloned()
    }

    /// Bytes of the blob, running `load` at most once per record
    pub async fn data_or_load<F, Fut>(&self, load: F) -> BlobResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = BlobResult<Bytes>>,
    {
        self.data.get_or_try_init(load).await.cloned()
    }
}

/// Output format requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// Original bytes, untouched
    #[default]
    Raw,
    WebP,
    Png,
    Jpeg,
}

impl OutputFormat {
    /// File extension used for derivative files
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::WebP => "webp",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    /// Content type served for this format
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            OutputFormat::Raw => None,
            OutputFormat::WebP => Some("image/webp"),
            OutputFormat::Png => Some("image/png"),
            OutputFormat::Jpeg => Some("image/jpeg"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "raw" => Ok(OutputFormat::Raw),
            "webp" => Ok(OutputFormat::WebP),
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            other => Err(BlobError::InvalidRequest(format!(
                "Unknown output format: {}",
                other
            ))),
        }
    }
}

/// Identifies a cached transformed variant of a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    pub cid: ContentId,
    pub format: OutputFormat,
    /// Target width, 0 for no resize
    pub width: u32,
    /// Target height, 0 for no resize
    pub height: u32,
}

impl DerivativeKey {
    /// File name of the derivative inside the blob directory
    ///
    /// Format: {cid}.{width}x{height}px.{format}
    pub fn file_name(&self) -> String {
        format!(
            "{}.{}x{}px.{}",
            self.cid,
            self.width,
            self.height,
            self.format.extension()
        )
    }
}

/// Transcoded bytes with their content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeRecord {
    pub data: Bytes,
    pub content_type: String,
}

/// Bytes ready to be served
#[derive(Debug, Clone)]
pub struct BlobOutput {
    pub data: Bytes,
    pub content_type: String,
}

impl From<DerivativeRecord> for BlobOutput {
    fn from(record: DerivativeRecord) -> Self {
        Self {
            data: record.data,
            content_type: record.content_type,
        }
    }
}

/// Metadata dump for the inspect endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BlobInspection {
    pub cid: String,
    #[serde(flatten)]
    pub meta: BlobMetadata,
}

impl From<&BlobRecord> for BlobInspection {
    fn from(record: &BlobRecord) -> Self {
        Self {
            cid: record.cid.to_string(),
            meta: record.meta.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::{test_support::cid_for, HashFunction};

    fn sample_meta() -> BlobMetadata {
        BlobMetadata {
            size: 5,
            content_type: "image/png".to_string(),
            mime: "image/png".to_string(),
            source: BlobSource {
                pds: "https://pds.example".to_string(),
                did: "did:plc:abc".to_string(),
                url: "https://pds.example/xrpc/com.atproto.sync.getBlob".to_string(),
            },
            time: Utc::now(),
            version: SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_metadata_json_field_names() {
        let json = serde_json::to_value(sample_meta()).unwrap();
        assert_eq!(json["size"], 5);
        assert_eq!(json["contentType"], "image/png");
        assert_eq!(json["mime"], "image/png");
        assert_eq!(json["source"]["pds"], "https://pds.example");
        assert_eq!(json["source"]["did"], "did:plc:abc");
        assert_eq!(json["version"], 1);
        assert!(json["time"].is_string());
    }

    #[test]
    fn test_reads_metadata_written_by_older_service() {
        let json = r#"{
          "size": 3,
          "contentType": "image/jpeg",
          "mime": "image/jpeg",
          "source": {"pds": "https://pds.example", "did": "did:plc:abc", "url": "https://pds.example/x"},
          "time": "2023-05-01T10:00:00+02:00",
          "version": 1
        }"#;
        let meta: BlobMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.size, 3);
        assert!(meta.is_fresh());
    }

    #[test]
    fn test_stale_version() {
        let mut meta = sample_meta();
        meta.version = 0;
        assert!(!meta.is_fresh());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("raw".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("WEBP".parse::<OutputFormat>().unwrap(), OutputFormat::WebP);
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert!("tiff".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_derivative_file_name() {
        let cid = ContentId::parse(&cid_for(b"img", HashFunction::Sha2_256)).unwrap();
        let key = DerivativeKey {
            cid: cid.clone(),
            format: OutputFormat::WebP,
            width: 200,
            height: 0,
        };
        assert_eq!(key.file_name(), format!("{}.200x0px.webp", cid));
    }

    #[tokio::test]
    async fn test_lazy_data_loads_once() {
        let cid = ContentId::parse(&cid_for(b"hello", HashFunction::Sha2_256)).unwrap();
        let record = BlobRecord::cold(cid, sample_meta());
        assert!(record.loaded_data().is_none());

        let first = record
            .data_or_load(|| async { Ok(Bytes::from_static(b"hello")) })
            .await
            .unwrap();
        assert_eq!(first, Bytes::from_static(b"hello"));

        let second = record
            .data_or_load(|| async { Err(BlobError::CacheReadError("not called".into())) })
            .await
            .unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_in_memory_data_skips_loader() {
        let cid = ContentId::parse(&cid_for(b"hello", HashFunction::Sha2_256)).unwrap();
        let record = BlobRecord::with_data(cid, sample_meta(), Bytes::from_static(b"hello"));
        let data = record
            .data_or_load(|| async { Err(BlobError::CacheReadError("not called".into())) })
            .await
            .unwrap();
        assert_eq!(&data[..], b"hello");
    }
}
