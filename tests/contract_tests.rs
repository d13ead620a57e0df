//! Import rewriter contract.
//!
//! Exact input/output pairs for the four rewritten shapes and the edge cases
//! around them. Everything outside the specifier literal must come through
//! byte-for-byte.

use pretty_assertions::assert_eq;
use standalone_bundler::assemble::{bootstrap_script, BootstrapConfig, StorageKeys};
use standalone_bundler::resolve::ModulePath;
use standalone_bundler::rewrite::{import_targets, rewrite, ImportShape, RewriteError};
use standalone_bundler::utils::VirtualRoot;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn path(raw: &str) -> ModulePath {
    ModulePath::parse(raw).unwrap()
}

fn rewritten(from: &str, source: &str) -> String {
    rewrite(&path(from), source, &VirtualRoot::default())
        .unwrap()
        .text
        .to_string()
}

fn assert_contract(from: &str, input: &str, expected: &str) {
    assert_eq!(rewritten(from, input), expected, "rewriting {from}");
    // A second pass must be a no-op.
    assert_eq!(rewritten(from, expected), expected, "re-rewriting {from}");
}

// ===========================================================================
// The four shapes
// ===========================================================================

#[test]
fn contract_static_import_with_bindings() {
    assert_contract(
        "a.x",
        "import { f } from './b.x';\nf();\n",
        "import { f } from 'app://standalone/b.x';\nf();\n",
    );
    assert_contract(
        "src/app.js",
        "import App, { mount as m } from './ui/app.js';",
        "import App, { mount as m } from 'app://standalone/src/ui/app.js';",
    );
    assert_contract(
        "src/app.js",
        "import * as store from '../state/store.js'",
        "import * as store from 'app://standalone/state/store.js'",
    );
}

#[test]
fn contract_side_effect_import() {
    assert_contract(
        "src/main.js",
        "import './polyfills.js';\nimport \"./theme/register.js\";\n",
        "import 'app://standalone/src/polyfills.js';\nimport \"app://standalone/src/theme/register.js\";\n",
    );
}

#[test]
fn contract_reexport() {
    assert_contract(
        "src/index.js",
        "export { a, b as c } from './parts.js';\nexport * from './all.js';\nexport * as ns from '../ns.js';\n",
        "export { a, b as c } from 'app://standalone/src/parts.js';\nexport * from 'app://standalone/src/all.js';\nexport * as ns from 'app://standalone/ns.js';\n",
    );
}

#[test]
fn contract_dynamic_import() {
    assert_contract(
        "src/views/list.js",
        "const mod = await import('../lazy/panel.js');\nimport(\"./detail.js\").then(open);\n",
        "const mod = await import('app://standalone/src/lazy/panel.js');\nimport(\"app://standalone/src/views/detail.js\").then(open);\n",
    );
}

// ===========================================================================
// Edge cases
// ===========================================================================

#[test]
fn contract_specifier_containing_from() {
    assert_contract(
        "lib/x.js",
        "import { from as f } from './from.js';\nimport from from './from/from.js';\n",
        "import { from as f } from 'app://standalone/lib/from.js';\nimport from from 'app://standalone/lib/from/from.js';\n",
    );
}

#[test]
fn contract_multi_line_import() {
    let input = "import {\n  one,\n  two, // trailing comment\n  three,\n} from\n  \"./dir/../many.js\";\n";
    let expected =
        "import {\n  one,\n  two, // trailing comment\n  three,\n} from\n  \"app://standalone/many.js\";\n";
    assert_contract("main.js", input, expected);
}

#[test]
fn contract_nested_quotes() {
    assert_contract(
        "a.js",
        r#"import "./it's.js";
const s = "say 'import(\"./no.js\")'";
"#,
        r#"import "app://standalone/it's.js";
const s = "say 'import(\"./no.js\")'";
"#,
    );
}

#[test]
fn contract_comments_and_strings_untouched() {
    let input = concat!(
        "// import x from './commented.js';\n",
        "/* export * from './block.js'; */\n",
        "const label = \"import './string.js'\";\n",
        "const tpl = `import('./template.js')`;\n",
        "const re = /import '\\.\\/regex.js'/;\n",
        "import './real.js';\n",
    );
    let out = rewritten("a.js", input);
    assert_eq!(
        out,
        input.replace("'./real.js'", "'app://standalone/real.js'")
    );
}

#[test]
fn contract_property_access_and_meta_untouched() {
    let input = "const url = import.meta.url;\nloader.import('./x.js');\nconfig.export = './y.js';\n";
    assert_eq!(rewritten("a.js", input), input);
}

#[test]
fn contract_non_relative_is_configuration_error() {
    for input in [
        "import React from 'react';",
        "import '/abs.js';",
        "export * from 'https://cdn.example.com/x.js';",
        "import('other://root/x.js');",
    ] {
        let err = rewrite(&path("a.js"), input, &VirtualRoot::default()).unwrap_err();
        assert!(
            matches!(err, RewriteError::NonRelative { .. }),
            "{input}: {err:?}"
        );
    }
}

#[test]
fn contract_ascending_past_root_is_fatal() {
    let err = rewrite(&path("src/a.js"), "import '../../x.js';", &VirtualRoot::default())
        .unwrap_err();
    assert!(matches!(err, RewriteError::Resolve { .. }));
    assert!(err.to_string().contains("src/a.js"));
}

#[test]
fn contract_custom_root() {
    let root = VirtualRoot::new("bundle://copy/");
    let out = rewrite(&path("a.js"), "import './b.js';", &root).unwrap();
    assert_eq!(out.text.as_str(), "import 'bundle://copy/b.js';");
    // Identifiers under a different root are foreign.
    assert!(rewrite(&path("a.js"), out.text.as_str(), &VirtualRoot::default()).is_err());
}

#[test]
fn contract_shapes_reported() {
    let shapes: Vec<ImportShape> = import_targets(
        "import a from './a.js'; import './b.js'; export { c } from './c.js'; import('./d.js');",
    )
    .into_iter()
    .map(|spec| spec.shape)
    .collect();
    assert_eq!(
        shapes,
        vec![
            ImportShape::Static,
            ImportShape::SideEffect,
            ImportShape::ReExport,
            ImportShape::Dynamic
        ]
    );
}

// ===========================================================================
// Bootstrap contract
// ===========================================================================

/// Frozen bootstrap: existing state is never overwritten, the snapshot and
/// its timestamp are written together, and the entry loads last.
const BOOTSTRAP_CONTRACT: &str = r#"const STATE_KEY = "diagram-state";
const TIMESTAMP_KEY = "diagram-state-saved-at";
const snapshotElement = document.getElementById("standalone-diagram");
try {
  if (snapshotElement && window.localStorage.getItem(STATE_KEY) === null) {
    window.localStorage.setItem(STATE_KEY, JSON.parse(snapshotElement.textContent));
    window.localStorage.setItem(TIMESTAMP_KEY, new Date().toISOString());
  }
} catch (error) {
  console.warn("standalone: persisted storage unavailable", error);
}
import("app://standalone/src/main.js");
"#;

#[test]
fn bootstrap_seeds_once_then_imports_entry() {
    let script = bootstrap_script(&BootstrapConfig {
        entry_identifier: "app://standalone/src/main.js".into(),
        storage: StorageKeys::default(),
    });
    assert_eq!(script, BOOTSTRAP_CONTRACT);
}

#[test]
fn bootstrap_keys_and_entry_are_script_safe() {
    let script = bootstrap_script(&BootstrapConfig {
        entry_identifier: "app://standalone/</script>.js".into(),
        storage: StorageKeys {
            state_key: "state\"</script>".into(),
            timestamp_key: "saved\u{2028}at".into(),
        },
    });
    assert_eq!(
        script.lines().take(2).collect::<Vec<_>>(),
        vec![
            r#"const STATE_KEY = "state\"\u003c/script>";"#,
            r#"const TIMESTAMP_KEY = "saved\u2028at";"#,
        ]
    );
    assert_eq!(
        script.lines().last(),
        Some(r#"import("app://standalone/\u003c/script>.js");"#)
    );
    assert!(!script.to_ascii_lowercase().contains("</script"));
}

