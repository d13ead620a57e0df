//! Utility functions for the bundler.
//!
//! - Virtual module identifier construction and parsing
//! - HTML / inline-script escaping (injection-safe)
//! - Post-build closure validation

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encode::ImportMapping;
use crate::resolve::ModulePath;
use crate::rewrite::{import_targets, RewrittenSource};
use crate::{Diagnostic, DiagnosticLevel};

// ---------------------------------------------------------------------------
// Virtual Module IDs
// ---------------------------------------------------------------------------

/// Default virtual root for module identifiers inside the artifact.
pub const DEFAULT_VIRTUAL_ROOT: &str = "app://standalone";

/// Prefix under which every bundled module is addressed: `<root>/<ModulePath>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualRoot(String);

impl VirtualRoot {
    /// Trailing slashes are trimmed so identifiers never contain `//` after the root.
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self(root.trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully-qualified identifier for a module.
    pub fn identifier(&self, path: &ModulePath) -> String {
        format!("{}/{}", self.0, path)
    }

    /// Whether a specifier is already a fully-qualified identifier under this root.
    pub fn owns(&self, specifier: &str) -> bool {
        specifier
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Inverse of [`VirtualRoot::identifier`].
    /// Returns `None` if the identifier is not under this root or is not a valid path.
    pub fn strip(&self, identifier: &str) -> Option<ModulePath> {
        let rest = identifier.strip_prefix(self.0.as_str())?.strip_prefix('/')?;
        let path = ModulePath::parse(rest).ok()?;
        // Reject non-canonical spellings so the mapping stays one-to-one.
        (path.as_str() == rest).then_some(path)
    }
}

impl Default for VirtualRoot {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_ROOT)
    }
}

impl fmt::Display for VirtualRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape text for HTML element or attribute context (`&`, `<`, `>`, `"`).
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_html`] for the four entities it produces.
pub fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Encode a string as a JSON/JS string literal that is safe inside `<script>`.
///
/// `<` becomes `\u003c`, so no `</script` or `<!--` sequence can appear, and
/// U+2028/U+2029 are escaped for older JS parsers. Decoding with
/// `JSON.parse` yields the input exactly.
pub fn script_string_literal(s: &str) -> String {
    let json = serde_json::Value::String(s.to_string()).to_string();
    escape_script_json(&json)
}

/// Make serialized JSON safe for embedding in a `<script>` element.
pub fn escape_script_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Escape sequence for `<!--` inside a classic `<script>`.
const SCRIPT_COMMENT_OPEN_ESCAPED: &str = "<\\x21--";

/// Neutralize a closing tag inside raw element text (`<style>` or classic `<script>`).
///
/// `</tag` becomes `<\/tag`, which is a no-op escape in both CSS and JS strings.
/// Inside `<script>`, `<!--` also becomes `<\x21--` so the tokenizer never
/// enters the escaped states where a nested `<script` hides the real close.
pub fn escape_raw_text(text: &str, tag: &str) -> String {
    let out = escape_closing_tag(text, tag);
    if tag.eq_ignore_ascii_case("script") {
        out.replace("<!--", SCRIPT_COMMENT_OPEN_ESCAPED)
    } else {
        out
    }
}

fn escape_closing_tag(text: &str, tag: &str) -> String {
    let needle = format!("</{tag}");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = find_ascii_case_insensitive(rest, &needle) {
        out.push_str(&rest[..idx]);
        out.push_str("<\\/");
        out.push_str(&rest[idx + 2..idx + needle.len()]);
        rest = &rest[idx + needle.len()..];
    }
    out.push_str(rest);
    out
}

/// Inverse of [`escape_raw_text`].
pub fn unescape_raw_text(text: &str, tag: &str) -> String {
    if tag.eq_ignore_ascii_case("script") {
        unescape_closing_tag(&text.replace(SCRIPT_COMMENT_OPEN_ESCAPED, "<!--"), tag)
    } else {
        unescape_closing_tag(text, tag)
    }
}

fn unescape_closing_tag(text: &str, tag: &str) -> String {
    let needle = format!("<\\/{tag}");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = find_ascii_case_insensitive(rest, &needle) {
        out.push_str(&rest[..idx]);
        out.push_str("</");
        out.push_str(&rest[idx + 3..idx + needle.len()]);
        rest = &rest[idx + needle.len()..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Derive a download filename from a document title.
/// Keeps ASCII alphanumerics, collapses everything else into single dashes.
pub fn suggested_filename(title: &str) -> String {
    let mut stem = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.ends_with('-') && !stem.is_empty() {
            stem.push('-');
        }
    }
    let stem = stem.trim_end_matches('-');
    if stem.is_empty() {
        "diagram.html".to_string()
    } else {
        format!("{stem}.html")
    }
}

// ---------------------------------------------------------------------------
// Post-Build Validation
// ---------------------------------------------------------------------------

/// Validate that every import target in every rewritten source is a key of the mapping.
pub fn validate_closure<'a>(
    sources: impl IntoIterator<Item = &'a RewrittenSource>,
    mapping: &ImportMapping,
) -> Result<(), Vec<Diagnostic>> {
    let mut missing = Vec::new();
    for source in sources {
        let unresolved = unresolved_targets(&source.text, mapping);
        for target in unresolved {
            missing.push(Diagnostic {
                level: DiagnosticLevel::Error,
                message: format!("Unresolved import '{}' in {}", target, source.path),
                context: Some("Every import target must be a key of the import map".into()),
            });
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Import targets in `source` that the mapping cannot satisfy, deduplicated and sorted.
pub fn unresolved_targets(source: &str, mapping: &ImportMapping) -> BTreeSet<String> {
    import_targets(source)
        .into_iter()
        .filter(|spec| !mapping.contains(&spec.value))
        .map(|spec| spec.value)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
