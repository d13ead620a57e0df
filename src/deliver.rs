//! Delivery of the assembled document.
//!
//! The document is serialized to an HTML blob and saved under the requested
//! filename. [`FileDelivery`] stages the bytes in a temporary file next to
//! the target and renames it into place, so a failed save leaves nothing
//! behind and the temporary handle is always released.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::assemble::AssembledDocument;

/// MIME type the blob is tagged with.
pub const HTML_MIME: &str = "text/html;charset=utf-8";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("target directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("failed to save {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A document serialized for saving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBlob {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl DocumentBlob {
    pub fn from_document(document: &AssembledDocument) -> Self {
        Self {
            bytes: document.as_str().as_bytes().to_vec(),
            mime: HTML_MIME,
        }
    }
}

pub trait Delivery {
    /// Save `document` as `filename`. Returns where it ended up.
    fn deliver(&self, document: &AssembledDocument, filename: &str)
        -> Result<PathBuf, DeliveryError>;
}

/// Saves into a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileDelivery {
    dir: PathBuf,
}

impl FileDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Delivery for FileDelivery {
    fn deliver(
        &self,
        document: &AssembledDocument,
        filename: &str,
    ) -> Result<PathBuf, DeliveryError> {
        validate_filename(filename)?;
        if !self.dir.is_dir() {
            return Err(DeliveryError::MissingDirectory(self.dir.clone()));
        }

        let blob = DocumentBlob::from_document(document);
        let target = self.dir.join(filename);
        let io_err = |source: std::io::Error| DeliveryError::Io {
            path: target.clone(),
            source,
        };

        // Dropping the temp file on any error below deletes it.
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        staged.write_all(&blob.bytes).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist(&target).map_err(|e| io_err(e.error))?;

        info!(path = %target.display(), bytes = blob.bytes.len(), mime = blob.mime, "document saved");
        Ok(target)
    }
}

fn validate_filename(filename: &str) -> Result<(), DeliveryError> {
    let invalid = filename.trim().is_empty()
        || filename.contains(['/', '\\', '\0'])
        || filename == "."
        || filename == "..";
    if invalid {
        return Err(DeliveryError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{assemble, BootstrapConfig, DocumentParts, StorageKeys};
    use crate::encode::{EncodedPayloads, SourceManifest};

    fn document() -> AssembledDocument {
        let payloads = EncodedPayloads {
            import_map: "{\"imports\":{}}".into(),
            manifest: "{}".into(),
            stylesheet: String::new(),
            snapshot: "\"{}\"".into(),
            library: None,
            manifest_record: SourceManifest {
                files: Default::default(),
                module_list: Vec::new(),
                third_party_library_encoded: None,
                stylesheet_encoded: None,
            },
        };
        let bootstrap = BootstrapConfig {
            entry_identifier: "app://standalone/main.js".into(),
            storage: StorageKeys::default(),
        };
        assemble(DocumentParts {
            title: "Ünïcode",
            payloads: &payloads,
            bootstrap: &bootstrap,
            degraded: &[],
            offline_csp: false,
        })
    }

    #[test]
    fn saves_exact_bytes_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document();
        let delivery = FileDelivery::new(dir.path());

        // Repeated exports overwrite in place.
        delivery.deliver(&doc, "out.html").unwrap();
        let path = delivery.deliver(&doc, "out.html").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), doc.as_str());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rejects_bad_targets() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document();
        let delivery = FileDelivery::new(dir.path());
        assert!(matches!(
            delivery.deliver(&doc, "../escape.html"),
            Err(DeliveryError::InvalidFilename(_))
        ));
        assert!(matches!(
            delivery.deliver(&doc, " "),
            Err(DeliveryError::InvalidFilename(_))
        ));
        assert!(matches!(
            FileDelivery::new(dir.path().join("missing")).deliver(&doc, "x.html"),
            Err(DeliveryError::MissingDirectory(_))
        ));
    }

    #[test]
    fn blob_is_tagged_html() {
        let blob = DocumentBlob::from_document(&document());
        assert_eq!(blob.mime, "text/html;charset=utf-8");
        assert!(blob.bytes.starts_with(b"<!DOCTYPE html>"));
    }
}
