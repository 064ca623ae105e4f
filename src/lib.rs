/// Aurora blobd - ATProto blob cache
///
/// Fetches blobs from the hosting endpoints of AT Protocol repositories,
/// verifies them against their CIDs, keeps them on local disk and serves
/// them back, with on-demand image derivatives.

pub mod api;
pub mod blob_store;
pub mod config;
pub mod content_id;
pub mod context;
pub mod error;
pub mod events;
pub mod identity;
pub mod metrics;
pub mod server;
pub mod transcode;
