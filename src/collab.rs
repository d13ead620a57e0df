//! Collaborators the export consumes but does not own.
//!
//! - the current diagram, as a serialized snapshot
//! - the page stylesheet text
//! - the optional third-party rendering library used by raster export
//!
//! Stylesheet and library sources prefer text embedded in a prior artifact
//! and only fall back to a fetch when nothing is embedded.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::debug;

use crate::acquire::fetcher::{FetchError, SourceFetcher};
use crate::acquire::ExecutionContext;
use crate::encode::EncodingError;

/// Feature that depends on the third-party library.
pub const RASTER_EXPORT_FEATURE: &str = "raster-export";

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("failed to fetch {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("diagram is not valid JSON: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("embedded payload could not be decoded: {0}")]
    Encoding(#[from] EncodingError),
}

#[async_trait]
pub trait DiagramSource: Send + Sync {
    /// Serialized diagram. The original text unless `pretty`; always re-parseable.
    async fn snapshot(&self, pretty: bool) -> Result<String, CollabError>;
}

#[async_trait]
pub trait StylesheetSource: Send + Sync {
    async fn stylesheet_text(&self) -> Result<String, CollabError>;
}

#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// `Ok(None)` when no library is configured at all.
    async fn library_text(&self) -> Result<Option<String>, CollabError>;
}

// ---------------------------------------------------------------------------
// Diagrams
// ---------------------------------------------------------------------------

/// A diagram held in memory, e.g. the snapshot recovered from an artifact.
#[derive(Debug, Clone)]
pub struct InlineDiagram(String);

impl InlineDiagram {
    pub fn new(json: impl Into<String>) -> Self {
        Self(json.into())
    }
}

#[async_trait]
impl DiagramSource for InlineDiagram {
    async fn snapshot(&self, pretty: bool) -> Result<String, CollabError> {
        reserialize(&self.0, pretty)
    }
}

/// A diagram JSON file on disk.
#[derive(Debug, Clone)]
pub struct DiagramFile {
    path: PathBuf,
}

impl DiagramFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DiagramSource for DiagramFile {
    async fn snapshot(&self, pretty: bool) -> Result<String, CollabError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CollabError::Io {
                path: self.path.clone(),
                source,
            })?;
        reserialize(&text, pretty)
    }
}

/// Validates `json` and hands it back untouched, or reformatted when `pretty`.
fn reserialize(json: &str, pretty: bool) -> Result<String, CollabError> {
    if pretty {
        let value: serde_json::Value = serde_json::from_str(json)?;
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    serde_json::from_str::<IgnoredAny>(json)?;
    Ok(json.trim().to_string())
}

// ---------------------------------------------------------------------------
// Embedded-or-fetched texts
// ---------------------------------------------------------------------------

/// Text that is either embedded in the running artifact or fetched from a
/// location. Shared by the stylesheet and library sources.
#[derive(Clone)]
pub struct EmbeddedOrFetched {
    embedded: Option<String>,
    location: Option<String>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl EmbeddedOrFetched {
    pub fn new(
        embedded: Option<String>,
        location: Option<String>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            embedded,
            location,
            fetcher,
        }
    }

    /// The page stylesheet for `context`.
    pub fn stylesheet(
        context: &ExecutionContext,
        location: Option<String>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self, EncodingError> {
        Ok(Self::new(context.embedded_stylesheet()?, location, fetcher))
    }

    /// The third-party library for `context`.
    pub fn library(
        context: &ExecutionContext,
        location: Option<String>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self, EncodingError> {
        Ok(Self::new(context.embedded_library()?, location, fetcher))
    }

    async fn text(&self) -> Result<Option<String>, CollabError> {
        if let Some(text) = &self.embedded {
            debug!(bytes = text.len(), "using embedded text");
            return Ok(Some(text.clone()));
        }
        let Some(location) = &self.location else {
            return Ok(None);
        };
        self.fetcher
            .fetch(location)
            .await
            .map(Some)
            .map_err(|source| CollabError::Fetch {
                location: location.clone(),
                source,
            })
    }
}

#[async_trait]
impl StylesheetSource for EmbeddedOrFetched {
    /// Empty when neither embedded nor configured.
    async fn stylesheet_text(&self) -> Result<String, CollabError> {
        Ok(self.text().await?.unwrap_or_default())
    }
}

#[async_trait]
impl LibrarySource for EmbeddedOrFetched {
    async fn library_text(&self) -> Result<Option<String>, CollabError> {
        self.text().await
    }
}
