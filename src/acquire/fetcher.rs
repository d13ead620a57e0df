//! Cold-path text fetchers.
//!
//! A fetcher maps a location relative to the hosted origin (a module path, the
//! stylesheet path, ...) to its text. The directory and HTTP fetchers cover the
//! two ways an application is hosted; [`OfflineFetcher`] refuses every request
//! and backs the warm re-bundle path.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::debug;

/// User agent for origin requests.
const USER_AGENT_VALUE: &str = concat!("standalone-bundler/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{location} not found")]
    NotFound { location: String },

    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request for {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{location} requested while offline")]
    Offline { location: String },
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the text at `location`, relative to the origin.
    async fn fetch(&self, location: &str) -> Result<String, FetchError>;

    /// Human-readable origin, for logs.
    fn origin(&self) -> String;
}

// ---------------------------------------------------------------------------
// Directory origin
// ---------------------------------------------------------------------------

/// Serves files below a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    async fn fetch(&self, location: &str) -> Result<String, FetchError> {
        let path = self.root.join(location);
        debug!(path = %path.display(), "reading source file");
        tokio::fs::read_to_string(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound {
                    location: location.to_string(),
                }
            } else {
                FetchError::Io {
                    location: location.to_string(),
                    source,
                }
            }
        })
    }

    fn origin(&self) -> String {
        self.root.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// HTTP origin
// ---------------------------------------------------------------------------

/// Serves locations below an HTTP(S) base URL. Absolute `http(s)://` locations
/// are fetched as-is.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| FetchError::Network {
                url: base_url.to_string(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, location: &str) -> String {
        if is_absolute_url(location) {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<String, FetchError> {
        let url = self.url_for(location);
        debug!(url = %url, "fetching source");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound { location: url });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Network {
            url,
            message: format!("failed to read response body: {e}"),
        })
    }

    fn origin(&self) -> String {
        self.base_url.clone()
    }
}

// ---------------------------------------------------------------------------
// Offline
// ---------------------------------------------------------------------------

/// Refuses every request. Used when re-bundling from an artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl SourceFetcher for OfflineFetcher {
    async fn fetch(&self, location: &str) -> Result<String, FetchError> {
        Err(FetchError::Offline {
            location: location.to_string(),
        })
    }

    fn origin(&self) -> String {
        "offline".to_string()
    }
}

pub fn is_absolute_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
