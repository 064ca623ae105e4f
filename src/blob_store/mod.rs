/// Blob Storage System
///
/// Content-addressed cache of blobs fetched from their hosting endpoints.
/// Every blob is verified against its CID before it is stored, and
/// transcoded derivatives are produced on demand and kept next to it.

pub mod derivative;
pub mod disk;
pub mod fetcher;
pub mod mime;
pub mod models;
pub mod singleflight;
pub mod store;

pub use derivative::DerivativeCache;
pub use disk::DiskBlobCache;
pub use fetcher::{BlobFetcher, FetchedBlob, XrpcBlobFetcher};
pub use models::*;
pub use store::{BlobStore, BlobStoreConfig, OutputOptions};
