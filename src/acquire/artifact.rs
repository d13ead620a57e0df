//! Reading a previously assembled artifact.
//!
//! The assembler marks every embedded payload with a fixed element id; this
//! module finds those elements again and decodes them. Nothing here is a
//! general HTML parser: it only understands documents this crate produced.

use regex::Regex;
use thiserror::Error;

use crate::assemble::{
    DEGRADED_META_NAME, LIBRARY_ELEMENT_ID, MANIFEST_ELEMENT_ID, SNAPSHOT_ELEMENT_ID,
    STYLE_ELEMENT_ID,
};
use crate::encode::{EncodingError, ImportMapping, SourceManifest};
use crate::utils::{unescape_html, unescape_raw_text};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact payload could not be decoded: {0}")]
    Encoding(#[from] EncodingError),

    #[error("artifact pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),

    #[error("embedded diagram snapshot is not a JSON string: {0}")]
    Snapshot(#[source] serde_json::Error),
}

/// Payloads recovered from an artifact's HTML.
#[derive(Debug, Clone, Default)]
pub struct PriorArtifact {
    pub title: Option<String>,
    pub manifest: Option<SourceManifest>,
    pub import_map: Option<ImportMapping>,
    /// Contents of the embedded `<style>` element, closing-tag escapes undone.
    pub stylesheet: Option<String>,
    pub snapshot: Option<String>,
    pub library: Option<String>,
    /// Features the artifact declared as unavailable when it was assembled.
    pub degraded: Vec<String>,
}

impl PriorArtifact {
    pub fn parse(html: &str) -> Result<Self, ArtifactError> {
        let manifest = element_text(html, &script_pattern("application/json", MANIFEST_ELEMENT_ID))?
            .map(|json| SourceManifest::from_json(&json))
            .transpose()?;

        let import_map = element_text(html, r#"<script type="importmap">"#)?
            .map(|json| ImportMapping::from_json(&json))
            .transpose()?;

        let snapshot = element_text(html, &script_pattern("application/json", SNAPSHOT_ELEMENT_ID))?
            .map(|literal| serde_json::from_str::<String>(&literal))
            .transpose()
            .map_err(ArtifactError::Snapshot)?;

        let stylesheet = element_text(html, &format!(r#"<style id="{STYLE_ELEMENT_ID}">"#))?
            .map(|css| unescape_raw_text(&css, "style"));

        let library = element_text(html, &format!(r#"<script id="{LIBRARY_ELEMENT_ID}">"#))?
            .map(|code| unescape_raw_text(&code, "script"));

        let title = element_text(html, "<title>")?.map(|t| unescape_html(&t));

        let degraded_meta = Regex::new(&format!(
            r#"<meta name="{}" content="([^"]*)">"#,
            regex::escape(DEGRADED_META_NAME)
        ))?;
        let degraded = degraded_meta
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| {
                unescape_html(m.as_str())
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            title,
            degraded,
            manifest,
            import_map,
            stylesheet,
            snapshot,
            library,
        })
    }
}

fn script_pattern(kind: &str, id: &str) -> String {
    format!(r#"<script type="{kind}" id="{id}">"#)
}

/// Text between `open_tag` and the next closing tag of the same element.
fn element_text(html: &str, open_tag: &str) -> Result<Option<String>, regex::Error> {
    let tag_name: String = open_tag
        .trim_start_matches('<')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    let pattern = format!(
        r"(?s){}(.*?)</{}>",
        regex::escape(open_tag),
        regex::escape(&tag_name)
    );
    let re = Regex::new(&pattern)?;
    Ok(re
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string()))
}
