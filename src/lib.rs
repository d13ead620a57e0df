//! # Standalone Bundler
//!
//! Turns a multi-module web application plus its stylesheet, an optional
//! third-party library and a diagram snapshot into one offline HTML document.
//!
//! The document embeds a manifest of its own inputs, so running the export
//! again from inside an artifact rebuilds an equivalent artifact without any
//! network access.
//!
//! Pipeline: acquire -> rewrite -> graph -> encode -> assemble -> deliver.

pub mod acquire;
pub mod assemble;
pub mod bundle;
pub mod collab;
pub mod config;
pub mod deliver;
pub mod encode;
pub mod events;
pub mod graph;
pub mod resolve;
pub mod rewrite;
pub mod utils;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use acquire::artifact::ArtifactError;
use acquire::fetcher::SourceFetcher;
use acquire::{AcquireError, ExecutionContext, Strategy};
use assemble::{AssembledDocument, StorageKeys};
use collab::{DiagramSource, LibrarySource, StylesheetSource};
use config::ConfigError;
use deliver::{Delivery, DeliveryError};
use encode::{EncodingError, SourceManifest};
use events::EventBus;
use graph::{GraphError, ModuleSet};
use utils::VirtualRoot;

pub use bundle::{verify_artifact, VerifyReport};

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic emitted during an export or verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Acquire,
    Encode,
    Assemble,
    Verify,
    Deliver,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Acquire => "acquire",
            Phase::Encode => "encode",
            Phase::Assemble => "assemble",
            Phase::Verify => "verify",
            Phase::Deliver => "deliver",
        })
    }
}

// ---------------------------------------------------------------------------
// ExportPlan / ExportOptions
// ---------------------------------------------------------------------------

/// Describes WHAT to export.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub module_set: ModuleSet,
    /// Raw document title.
    pub title: String,
    /// Filename handed to delivery.
    pub filename: String,
}

/// Describes HOW to export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub virtual_root: VirtualRoot,
    pub storage: StorageKeys,
    /// Forbid network access from the artifact via Content-Security-Policy.
    pub offline_csp: bool,
    /// Re-parse and verify the assembled document before returning it.
    pub verify: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            virtual_root: VirtualRoot::default(),
            storage: StorageKeys::default(),
            offline_csp: true,
            verify: true,
        }
    }
}

/// Where an export's inputs come from.
#[derive(Clone, Copy)]
pub struct ExportSources<'a> {
    /// Cold-path fetcher. Never called when `context` carries a manifest.
    pub fetcher: &'a Arc<dyn SourceFetcher>,
    pub context: &'a ExecutionContext,
    pub diagram: &'a dyn DiagramSource,
    pub stylesheet: &'a dyn StylesheetSource,
    pub library: &'a dyn LibrarySource,
    pub events: &'a EventBus,
}

// ---------------------------------------------------------------------------
// ExportResult
// ---------------------------------------------------------------------------

/// The outcome of a successful export, ready for delivery.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub document: AssembledDocument,
    pub filename: String,
    /// The manifest embedded in `document`.
    pub manifest: SourceManifest,
    pub strategy: Strategy,
    /// Optional features left out of the artifact.
    pub degraded: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// ExportError
// ---------------------------------------------------------------------------

/// Errors that abort the export. Nothing is delivered after any of these.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{phase}: could not acquire {path}: {cause}")]
    Acquisition {
        path: String,
        phase: Phase,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("resolution failed: {0}")]
    Resolution(#[source] GraphError),

    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unreadable artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("artifact failed verification: {}", summarize(.0))]
    Verification(Vec<Diagnostic>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<AcquireError> for ExportError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Fetch { path, cause } => ExportError::Acquisition {
                path,
                phase: Phase::Acquire,
                cause: Box::new(cause),
            },
            AcquireError::MissingFromManifest { path } => ExportError::Acquisition {
                path: path.to_string(),
                phase: Phase::Acquire,
                cause: Box::new(AcquireError::MissingFromManifest { path }),
            },
            AcquireError::Decode(e) => ExportError::Encoding(e),
        }
    }
}

impl From<GraphError> for ExportError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Acquire(e) => e.into(),
            other => ExportError::Resolution(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build the single-file document described by `plan`.
///
/// All-or-nothing: any module or stylesheet failure aborts the export. A
/// missing third-party library only degrades raster export.
pub async fn export_document(
    plan: ExportPlan,
    opts: ExportOptions,
    sources: ExportSources<'_>,
) -> Result<ExportResult, ExportError> {
    bundle::execute_export(plan, opts, sources).await
}

/// [`export_document`], then hand the document to `delivery`.
pub async fn export_and_deliver(
    plan: ExportPlan,
    opts: ExportOptions,
    sources: ExportSources<'_>,
    delivery: &dyn Delivery,
) -> Result<(ExportResult, PathBuf), ExportError> {
    let events = sources.events;
    let result = bundle::execute_export(plan, opts, sources).await?;
    let path = bundle::deliver_export(&result, delivery, events)?;
    Ok((result, path))
}
