//! Document assembly.
//!
//! Emits the single-file artifact, in order: styles, the application DOM
//! skeleton, the diagram snapshot, the source manifest, the import map, the
//! third-party library and the bootstrap module.

use serde::{Deserialize, Serialize};

use crate::encode::EncodedPayloads;
use crate::utils::{escape_html, script_string_literal};

pub const MANIFEST_ELEMENT_ID: &str = "standalone-source-manifest";
pub const SNAPSHOT_ELEMENT_ID: &str = "standalone-diagram";
pub const STYLE_ELEMENT_ID: &str = "standalone-styles";
pub const LIBRARY_ELEMENT_ID: &str = "standalone-library";
pub const DEGRADED_META_NAME: &str = "standalone-degraded";

/// Same skeleton the hosted page serves, so application code never has to
/// know whether it runs standalone.
pub const APP_SKELETON: &str = r#"<header id="titlebar" class="titlebar">
  <h1 id="diagram-title" class="titlebar__title"></h1>
  <nav id="toolbar" class="titlebar__actions"></nav>
</header>
<main id="workspace" class="workspace">
  <section id="canvas" class="canvas" tabindex="0"></section>
  <aside id="inspector" class="inspector"></aside>
</main>
<input id="file-input" type="file" accept=".json,application/json" hidden>"#;

/// Blocks every network fetch; inline and `data:` resources stay allowed.
pub const OFFLINE_CSP: &str = "default-src 'none'; script-src 'unsafe-inline' data:; \
style-src 'unsafe-inline'; img-src data: blob:; font-src data:; connect-src data: blob:";

/// Persisted storage keys the bootstrap seeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub state_key: String,
    pub timestamp_key: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            state_key: "diagram-state".into(),
            timestamp_key: "diagram-state-saved-at".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Virtual identifier of the entry module.
    pub entry_identifier: String,
    pub storage: StorageKeys,
}

/// Inputs to [`assemble`].
#[derive(Debug, Clone, Copy)]
pub struct DocumentParts<'a> {
    /// Raw title; escaped here.
    pub title: &'a str,
    pub payloads: &'a EncodedPayloads,
    pub bootstrap: &'a BootstrapConfig,
    /// Features that could not be embedded, e.g. `raster-export`.
    pub degraded: &'a [String],
    /// Emit a Content-Security-Policy that forbids network access.
    pub offline_csp: bool,
}

/// The final HTML text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledDocument(String);

impl AssembledDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

pub fn assemble(parts: DocumentParts<'_>) -> AssembledDocument {
    let title = escape_html(parts.title);
    let payloads = parts.payloads;
    let mut html = String::with_capacity(
        payloads.import_map.len() + payloads.manifest.len() + payloads.stylesheet.len() + 4096,
    );

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"UTF-8\">\n");
    html.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    if parts.offline_csp {
        html.push_str(&format!(
            "<meta http-equiv=\"Content-Security-Policy\" content=\"{OFFLINE_CSP}\">\n"
        ));
    }
    html.push_str(&format!(
        "<meta name=\"generator\" content=\"standalone-bundler {}\">\n",
        env!("CARGO_PKG_VERSION")
    ));
    html.push_str(&format!("<meta name=\"application-name\" content=\"{title}\">\n"));
    if !parts.degraded.is_empty() {
        html.push_str(&format!(
            "<meta name=\"{DEGRADED_META_NAME}\" content=\"{}\">\n",
            escape_html(&parts.degraded.join(" "))
        ));
    }
    html.push_str(&format!("<title>{title}</title>\n"));
    html.push_str(&format!(
        "<style id=\"{STYLE_ELEMENT_ID}\">{}</style>\n",
        payloads.stylesheet
    ));
    html.push_str("</head>\n<body>\n");

    html.push_str(APP_SKELETON);
    html.push('\n');

    html.push_str(&format!(
        "<script type=\"application/json\" id=\"{SNAPSHOT_ELEMENT_ID}\">{}</script>\n",
        payloads.snapshot
    ));
    html.push_str(&format!(
        "<script type=\"application/json\" id=\"{MANIFEST_ELEMENT_ID}\">{}</script>\n",
        payloads.manifest
    ));
    html.push_str(&format!(
        "<script type=\"importmap\">{}</script>\n",
        payloads.import_map
    ));
    if let Some(library) = &payloads.library {
        html.push_str(&format!(
            "<script id=\"{LIBRARY_ELEMENT_ID}\">{library}</script>\n"
        ));
    }
    html.push_str(&format!(
        "<script type=\"module\">\n{}</script>\n",
        bootstrap_script(parts.bootstrap)
    ));
    html.push_str("</body>\n</html>\n");

    AssembledDocument(html)
}

/// The bootstrap module.
///
/// Seeds persisted storage from the embedded snapshot only when no diagram
/// state exists yet, then loads the entry module by its virtual identifier.
pub fn bootstrap_script(config: &BootstrapConfig) -> String {
    format!(
        r#"const STATE_KEY = {state_key};
const TIMESTAMP_KEY = {timestamp_key};
const snapshotElement = document.getElementById({snapshot_id});
try {{
  if (snapshotElement && window.localStorage.getItem(STATE_KEY) === null) {{
    window.localStorage.setItem(STATE_KEY, JSON.parse(snapshotElement.textContent));
    window.localStorage.setItem(TIMESTAMP_KEY, new Date().toISOString());
  }}
}} catch (error) {{
  console.warn("standalone: persisted storage unavailable", error);
}}
import({entry});
"#,
        state_key = script_string_literal(&config.storage.state_key),
        timestamp_key = script_string_literal(&config.storage.timestamp_key),
        snapshot_id = script_string_literal(SNAPSHOT_ELEMENT_ID),
        entry = script_string_literal(&config.entry_identifier),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::SourceManifest;
    use std::collections::BTreeMap;

    fn payloads(library: Option<&str>) -> EncodedPayloads {
        EncodedPayloads {
            import_map: r#"{"imports":{}}"#.into(),
            manifest: r#"{"files":{},"moduleList":[]}"#.into(),
            stylesheet: "body{margin:0}".into(),
            snapshot: script_string_literal(r#"{"nodes":[]}"#),
            library: library.map(str::to_string),
            manifest_record: SourceManifest {
                files: BTreeMap::new(),
                module_list: Vec::new(),
                third_party_library_encoded: None,
                stylesheet_encoded: None,
            },
        }
    }

    fn bootstrap() -> BootstrapConfig {
        BootstrapConfig {
            entry_identifier: "app://standalone/src/main.js".into(),
            storage: StorageKeys::default(),
        }
    }

    fn doc(title: &str, library: Option<&str>, degraded: &[String]) -> String {
        let payloads = payloads(library);
        let bootstrap = bootstrap();
        assemble(DocumentParts {
            title,
            payloads: &payloads,
            bootstrap: &bootstrap,
            degraded,
            offline_csp: true,
        })
        .into_string()
    }

    #[test]
    fn title_is_escaped_in_head() {
        let html = doc(r#"My <Diagram> & "Co""#, None, &[]);
        let head = &html[..html.find("</head>").unwrap()];
        assert!(head.contains("<title>My &lt;Diagram&gt; &amp; &quot;Co&quot;</title>"));
        assert!(head.contains(
            r#"<meta name="application-name" content="My &lt;Diagram&gt; &amp; &quot;Co&quot;">"#
        ));
        assert!(!head.contains("<Diagram>"));
    }

    #[test]
    fn sections_appear_in_order() {
        let html = doc("t", Some("window.lib = 1;"), &[]);
        let order = [
            "<style id=\"standalone-styles\">",
            "<header id=\"titlebar\"",
            "<input id=\"file-input\" type=\"file\"",
            "id=\"standalone-diagram\"",
            "id=\"standalone-source-manifest\"",
            "<script type=\"importmap\">",
            "<script id=\"standalone-library\">",
            "<script type=\"module\">",
        ];
        let positions: Vec<usize> = order.iter().map(|m| html.find(m).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[test]
    fn degraded_features_are_declared() {
        let html = doc("t", None, &["raster-export".to_string()]);
        assert!(html.contains(r#"<meta name="standalone-degraded" content="raster-export">"#));
        assert!(!html.contains("standalone-library"));
    }

    #[test]
    fn bootstrap_seeds_only_when_absent() {
        let script = bootstrap_script(&bootstrap());
        assert!(script.contains(r#"const STATE_KEY = "diagram-state";"#));
        assert!(script.contains("getItem(STATE_KEY) === null"));
        assert!(script.contains("setItem(TIMESTAMP_KEY"));
        assert!(script.trim_end().ends_with(r#"import("app://standalone/src/main.js");"#));
    }
}
