//! Artifact payload encoding.
//!
//! Every text destined for the manifest goes through [`EncodedText`]: base64
//! over the UTF-8 bytes of the input, never over chars.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::ModuleGraph;
use crate::resolve::ModulePath;
use crate::utils::{escape_raw_text, escape_script_json, script_string_literal};

/// MIME prefix for inline module payloads.
pub const MODULE_DATA_URI_PREFIX: &str = "data:text/javascript;charset=utf-8;base64,";

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{0}' is not an inline module payload")]
    NotInlineModule(String),
}

// ---------------------------------------------------------------------------
// EncodedText
// ---------------------------------------------------------------------------

/// Base64 of UTF-8 bytes. Safe for JSON, HTML and data URIs without further escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedText(String);

impl EncodedText {
    pub fn encode(text: &str) -> Self {
        Self(BASE64.encode(text.as_bytes()))
    }

    pub fn decode(&self) -> Result<String, EncodingError> {
        let bytes = BASE64.decode(self.0.as_bytes())?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// SourceManifest
// ---------------------------------------------------------------------------

/// Self-describing record of everything needed to rebuild the artifact offline.
///
/// `module_list[0]` is the entry module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceManifest {
    pub files: BTreeMap<ModulePath, EncodedText>,
    pub module_list: Vec<ModulePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_party_library_encoded: Option<EncodedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stylesheet_encoded: Option<EncodedText>,
}

impl SourceManifest {
    pub fn entry(&self) -> Option<&ModulePath> {
        self.module_list.first()
    }

    /// Decode every file entry back to text.
    pub fn decode_files(&self) -> Result<BTreeMap<ModulePath, String>, EncodingError> {
        self.files
            .iter()
            .map(|(path, encoded)| Ok((path.clone(), encoded.decode()?)))
            .collect()
    }

    pub fn stylesheet(&self) -> Result<Option<String>, EncodingError> {
        self.stylesheet_encoded.as_ref().map(EncodedText::decode).transpose()
    }

    pub fn library(&self) -> Result<Option<String>, EncodingError> {
        self.third_party_library_encoded
            .as_ref()
            .map(EncodedText::decode)
            .transpose()
    }

    pub fn from_json(json: &str) -> Result<Self, EncodingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// JSON suitable for an inline `<script type="application/json">` element.
    pub fn to_script_json(&self) -> Result<String, EncodingError> {
        Ok(escape_script_json(&serde_json::to_string(self)?))
    }
}

// ---------------------------------------------------------------------------
// ImportMapping
// ---------------------------------------------------------------------------

/// Virtual identifier -> inline module payload (a base64 `data:` URI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMapping {
    imports: BTreeMap<String, String>,
}

impl ImportMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register module text under its identifier. Returns `false` if the key already existed.
    pub fn insert(&mut self, identifier: String, source: &str) -> bool {
        self.imports
            .insert(identifier, inline_module(source))
            .is_none()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.imports.contains_key(identifier)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.imports.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// Decode the module text registered under `identifier`.
    pub fn module_text(&self, identifier: &str) -> Option<Result<String, EncodingError>> {
        self.imports.get(identifier).map(|uri| decode_inline_module(uri))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `{"imports": {...}}` declaration, safe for an inline `<script type="importmap">`.
    pub fn to_script_json(&self) -> Result<String, EncodingError> {
        Ok(escape_script_json(&serde_json::to_string(self)?))
    }

    pub fn from_json(json: &str) -> Result<Self, EncodingError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Encode module text as a directly loadable `data:` URI.
pub fn inline_module(source: &str) -> String {
    format!(
        "{}{}",
        MODULE_DATA_URI_PREFIX,
        EncodedText::encode(source).as_str()
    )
}

pub fn decode_inline_module(uri: &str) -> Result<String, EncodingError> {
    let payload = uri
        .strip_prefix(MODULE_DATA_URI_PREFIX)
        .ok_or_else(|| EncodingError::NotInlineModule(uri.chars().take(48).collect()))?;
    EncodedText(payload.to_string()).decode()
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Everything the document assembler embeds, already escaped for its context.
#[derive(Debug, Clone)]
pub struct EncodedPayloads {
    /// Body of the `<script type="importmap">` element.
    pub import_map: String,
    /// Body of the manifest `<script type="application/json">` element.
    pub manifest: String,
    /// Body of the `<style>` element.
    pub stylesheet: String,
    /// JSON string literal holding the diagram snapshot.
    pub snapshot: String,
    /// Body of the classic `<script>` carrying the third-party library, if any.
    pub library: Option<String>,
    /// The manifest as embedded, for callers that want to inspect it.
    pub manifest_record: SourceManifest,
}

/// Turn a built graph plus the ambient texts into embeddable payloads.
pub fn encode(
    graph: &ModuleGraph,
    diagram_snapshot: &str,
    stylesheet: &str,
    library: Option<&str>,
) -> Result<EncodedPayloads, EncodingError> {
    let files = graph
        .module_list
        .iter()
        .filter_map(|path| graph.sources.get(path))
        .map(|source| (source.path.clone(), EncodedText::encode(&source.text)))
        .collect();

    let manifest = SourceManifest {
        files,
        module_list: graph.module_list.clone(),
        third_party_library_encoded: library.map(EncodedText::encode),
        stylesheet_encoded: Some(EncodedText::encode(stylesheet)),
    };

    Ok(EncodedPayloads {
        import_map: graph.import_mapping.to_script_json()?,
        manifest: manifest.to_script_json()?,
        stylesheet: escape_raw_text(stylesheet, "style"),
        snapshot: script_string_literal(diagram_snapshot),
        library: library.map(|code| escape_raw_text(code, "script")),
        manifest_record: manifest,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_text_handles_multibyte() {
        let text = "ünïcødé ✓ 图 🚀 '\"</script>";
        let encoded = EncodedText::encode(text);
        assert!(encoded.as_str().is_ascii());
        assert_eq!(encoded.decode().unwrap(), text);
    }

    #[test]
    fn invalid_payloads_are_errors() {
        assert!(matches!(
            EncodedText("@@@".into()).decode(),
            Err(EncodingError::Base64(_))
        ));
        // 0xFF 0xFE is not UTF-8.
        let latin = EncodedText(BASE64.encode([0xff, 0xfe]));
        assert!(matches!(latin.decode(), Err(EncodingError::Utf8(_))));
    }

    #[test]
    fn manifest_json_shape() {
        let path = ModulePath::parse("src/main.js").unwrap();
        let manifest = SourceManifest {
            files: BTreeMap::from([(path.clone(), EncodedText::encode("x"))]),
            module_list: vec![path],
            third_party_library_encoded: None,
            stylesheet_encoded: Some(EncodedText::encode("body{}")),
        };
        let json = manifest.to_script_json().unwrap();
        assert!(json.contains("\"moduleList\":[\"src/main.js\"]"));
        assert!(json.contains("\"stylesheetEncoded\""));
        assert!(!json.contains("thirdPartyLibraryEncoded"));
        assert_eq!(SourceManifest::from_json(&json).unwrap(), manifest);
    }

    #[test]
    fn manifest_rejects_unnormalized_paths() {
        let json = r#"{"files":{"../x.js":"eA=="},"moduleList":["../x.js"]}"#;
        assert!(SourceManifest::from_json(json).is_err());
    }

    #[test]
    fn import_mapping_roundtrip() {
        let mut mapping = ImportMapping::new();
        assert!(mapping.insert("app://standalone/a.js".into(), "export const a = 'ä';"));
        assert!(!mapping.insert("app://standalone/a.js".into(), "again"));
        let json = mapping.to_script_json().unwrap();
        assert!(json.starts_with("{\"imports\":{"));
        let back = ImportMapping::from_json(&json).unwrap();
        assert_eq!(
            back.module_text("app://standalone/a.js").unwrap().unwrap(),
            "again"
        );
    }
}
