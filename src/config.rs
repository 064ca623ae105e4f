/// Configuration management for the blob cache service
use crate::{
    error::{BlobError, BlobResult},
    transcode::DEFAULT_MAX_DIMENSION,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub locator: LocatorSettings,
    pub fetch: FetchConfig,
    pub transcode: TranscodeConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    /// Where metadata, blobs and derivatives are kept
    pub blob_directory: PathBuf,
}

/// Which repository locator to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    /// JSON directory service answering `{"pds": [...], "did": ...}`
    Directory,
    /// DID documents from the PLC directory or did:web hosts
    DidDoc,
}

impl FromStr for LocatorKind {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" => Ok(LocatorKind::Directory),
            "did-doc" | "diddoc" | "plc" => Ok(LocatorKind::DidDoc),
            other => Err(BlobError::Config(format!("Unknown locator kind: {}", other))),
        }
    }
}

/// Repository locator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorSettings {
    pub kind: LocatorKind,
    /// Base URL of the repository directory
    pub directory_url: String,
    /// Base URL of the PLC directory
    pub plc_url: String,
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Derivative production limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Largest width or height a derivative may be asked for
    pub max_dimension: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BlobResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_lookup<F>(var: F) -> BlobResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hostname = var("BLOBD_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = var("BLOBD_PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| BlobError::Config("Invalid port number".to_string()))?;

        let data_directory: PathBuf = var("BLOBD_DATA_DIR")
            .unwrap_or_else(|| "./data".to_string())
            .into();
        let blob_directory = var("BLOBD_BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_directory.join("blobs"));

        let kind = match var("BLOBD_LOCATOR") {
            Some(kind) => kind.parse()?,
            None => LocatorKind::Directory,
        };
        let directory_url =
            var("BLOBD_LOCATOR_URL").unwrap_or_else(|| "https://api.atscan.net".to_string());
        let plc_url = var("BLOBD_PLC_URL").unwrap_or_else(|| "https://plc.directory".to_string());

        let timeout_secs = var("BLOBD_FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map_err(|_| BlobError::Config("Invalid fetch timeout".to_string()))?;
        let user_agent = var("BLOBD_USER_AGENT")
            .unwrap_or_else(|| format!("aurora-blobd/{}", env!("CARGO_PKG_VERSION")));

        let max_dimension = var("BLOBD_MAX_DIMENSION")
            .unwrap_or_else(|| DEFAULT_MAX_DIMENSION.to_string())
            .parse()
            .map_err(|_| BlobError::Config("Invalid maximum dimension".to_string()))?;

        let log_level = var("RUST_LOG")
            .unwrap_or_else(|| "aurora_blobd=info,tower_http=info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
            },
            storage: StorageConfig {
                data_directory,
                blob_directory,
            },
            locator: LocatorSettings {
                kind,
                directory_url,
                plc_url,
            },
            fetch: FetchConfig {
                timeout_secs,
                user_agent,
            },
            transcode: TranscodeConfig { max_dimension },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> BlobResult<()> {
        if self.service.hostname.is_empty() {
            return Err(BlobError::Config("Hostname cannot be empty".to_string()));
        }

        if self.fetch.timeout_secs == 0 {
            return Err(BlobError::Config(
                "Fetch timeout must be at least one second".to_string(),
            ));
        }

        if self.transcode.max_dimension == 0 {
            return Err(BlobError::Config(
                "Maximum dimension must be at least one pixel".to_string(),
            ));
        }

        let base = match self.locator.kind {
            LocatorKind::Directory => &self.locator.directory_url,
            LocatorKind::DidDoc => &self.locator.plc_url,
        };
        reqwest::Url::parse(base)
            .map_err(|e| BlobError::Config(format!("Invalid locator URL {}: {}", base, e)))?;

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}
