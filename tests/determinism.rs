use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use standalone_bundler::acquire::fetcher::{DirectoryFetcher, FetchError, SourceFetcher};
use standalone_bundler::acquire::ExecutionContext;
use standalone_bundler::collab::{DiagramFile, EmbeddedOrFetched};
use standalone_bundler::config::ExportConfig;
use standalone_bundler::events::EventBus;
use standalone_bundler::{export_document, ExportResult, ExportSources};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Writes a small application into a temp directory.
fn write_app(dir: &std::path::Path) {
    let files = [
        (
            "src/main.js",
            "import { a } from './a.js';\nimport { b } from './b.js';\nexport { c } from './nested/c.js';\nconsole.log(a, b);\n",
        ),
        ("src/a.js", "export const a = 'ä';\n"),
        ("src/b.js", "import { a } from './a.js';\nexport const b = a + '→b';\n"),
        ("src/nested/c.js", "export const c = import('../a.js');\n"),
        ("style.css", "body { font-family: 'Noto Sans'; }\n"),
        ("diagram.json", r#"{"edges":[],"nodes":[{"id":"x"}]}"#),
    ];
    for (rel, text) in files {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }
}

async fn export_dir(dir: &std::path::Path) -> ExportResult {
    let config = ExportConfig {
        title: "Determinism".into(),
        stylesheet: Some("style.css".into()),
        ..Default::default()
    };
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(DirectoryFetcher::new(dir));
    let context = ExecutionContext::hosted();
    let stylesheet =
        EmbeddedOrFetched::stylesheet(&context, config.stylesheet.clone(), fetcher.clone()).unwrap();
    let library = EmbeddedOrFetched::library(&context, None, fetcher.clone()).unwrap();
    let diagram = DiagramFile::new(dir.join("diagram.json"));
    let events = EventBus::default();
    export_document(
        config.plan().unwrap(),
        config.options().unwrap(),
        ExportSources {
            fetcher: &fetcher,
            context: &context,
            diagram: &diagram,
            stylesheet: &stylesheet,
            library: &library,
            events: &events,
        },
    )
    .await
    .unwrap()
}

fn sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns every file the origin serves, with a delay that reverses
/// completion order relative to request order.
struct SlowFirstOrigin {
    files: BTreeMap<String, String>,
}

#[async_trait]
impl SourceFetcher for SlowFirstOrigin {
    async fn fetch(&self, location: &str) -> Result<String, FetchError> {
        let delay = 40u64.saturating_sub(location.len() as u64 * 3);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        self.files
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                location: location.to_string(),
            })
    }

    fn origin(&self) -> String {
        "slow".into()
    }
}

// ===========================================================================
// Deterministic output
// ===========================================================================

#[tokio::test]
async fn deterministic_export_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    write_app(dir.path());

    let first = export_dir(dir.path()).await;
    let second = export_dir(dir.path()).await;

    assert_eq!(
        sha256(first.document.as_str()),
        sha256(second.document.as_str()),
        "Exports must produce identical bytes"
    );
}

#[tokio::test]
async fn deterministic_module_order() {
    let dir = tempfile::tempdir().unwrap();
    write_app(dir.path());
    let result = export_dir(dir.path()).await;

    let order: Vec<&str> = result
        .manifest
        .module_list
        .iter()
        .map(|p| p.as_str())
        .collect();
    assert_eq!(
        order,
        vec!["src/main.js", "src/a.js", "src/b.js", "src/nested/c.js"]
    );
}

#[tokio::test]
async fn completion_order_does_not_leak_into_output() {
    let dir = tempfile::tempdir().unwrap();
    write_app(dir.path());
    let baseline = export_dir(dir.path()).await;

    let mut files = BTreeMap::new();
    for rel in ["src/main.js", "src/a.js", "src/b.js", "src/nested/c.js", "style.css"] {
        files.insert(
            rel.to_string(),
            std::fs::read_to_string(dir.path().join(rel)).unwrap(),
        );
    }
    let config = ExportConfig {
        title: "Determinism".into(),
        stylesheet: Some("style.css".into()),
        ..Default::default()
    };
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(SlowFirstOrigin { files });
    let context = ExecutionContext::hosted();
    let stylesheet =
        EmbeddedOrFetched::stylesheet(&context, config.stylesheet.clone(), fetcher.clone()).unwrap();
    let library = EmbeddedOrFetched::library(&context, None, fetcher.clone()).unwrap();
    let diagram = DiagramFile::new(dir.path().join("diagram.json"));
    let events = EventBus::default();
    let slow = export_document(
        config.plan().unwrap(),
        config.options().unwrap(),
        ExportSources {
            fetcher: &fetcher,
            context: &context,
            diagram: &diagram,
            stylesheet: &stylesheet,
            library: &library,
            events: &events,
        },
    )
    .await
    .unwrap();

    assert_eq!(
        sha256(slow.document.as_str()),
        sha256(baseline.document.as_str())
    );
}
