//! Export orchestration.
//!
//! 1. Select the acquisition strategy from the execution context
//! 2. Build the module graph, stylesheet, diagram snapshot and library concurrently
//! 3. Encode payloads and assemble the document
//! 4. Verify the document against its own import map and manifest
//! 5. Hand it to delivery
//!
//! Steps 1-4 never touch the output location, so a failure anywhere leaves
//! nothing behind.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::acquire::artifact::PriorArtifact;
use crate::acquire::SourceAcquirer;
use crate::assemble::{assemble, BootstrapConfig, DocumentParts};
use crate::collab::{CollabError, RASTER_EXPORT_FEATURE};
use crate::deliver::Delivery;
use crate::encode::{decode_inline_module, encode};
use crate::events::{EventBus, ExportEvent};
use crate::graph::{GraphBuilder, GraphError};
use crate::resolve::ModulePath;
use crate::utils::{script_string_literal, unresolved_targets, VirtualRoot};
use crate::{
    Diagnostic, DiagnosticLevel, ExportError, ExportOptions, ExportPlan, ExportResult,
    ExportSources, Phase,
};

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

pub async fn execute_export(
    plan: ExportPlan,
    opts: ExportOptions,
    sources: ExportSources<'_>,
) -> Result<ExportResult, ExportError> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let events = sources.events;

    let acquirer = SourceAcquirer::new(sources.fetcher.clone(), sources.context)?;
    let strategy = acquirer.strategy();
    events.publish(ExportEvent::StrategySelected(strategy));
    info!(?strategy, title = %plan.title, "export started");
    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Info,
        message: format!("Export started for '{}' ({strategy:?} acquisition)", plan.title),
        context: None,
    });

    events.publish(ExportEvent::PhaseStarted(Phase::Acquire));
    let builder = GraphBuilder::new(&acquirer, &opts.virtual_root).with_events(events);

    // Required inputs fail fast together; the library never fails the group.
    let (graph, stylesheet, snapshot, library) = tokio::try_join!(
        async { builder.build(&plan.module_set).await.map_err(ExportError::from) },
        async {
            sources
                .stylesheet
                .stylesheet_text()
                .await
                .map_err(|e| collab_failure("stylesheet", e))
        },
        async {
            sources
                .diagram
                .snapshot(false)
                .await
                .map_err(|e| collab_failure("diagram snapshot", e))
        },
        async { Ok::<_, ExportError>(sources.library.library_text().await) },
    )?;

    let mut degraded = Vec::new();
    let library = match library {
        Ok(Some(text)) => Some(text),
        // Nothing to fetch; an artifact built without the library stays without it.
        Ok(None) => {
            if sources
                .context
                .prior_degraded()
                .iter()
                .any(|f| f == RASTER_EXPORT_FEATURE)
            {
                degrade_raster_export(
                    "library was already missing from the prior artifact",
                    events,
                    &mut diagnostics,
                    &mut degraded,
                );
            }
            None
        }
        Err(e) => {
            degrade_raster_export(&e.to_string(), events, &mut diagnostics, &mut degraded);
            None
        }
    };

    events.publish(ExportEvent::PhaseStarted(Phase::Encode));
    let payloads = encode(&graph, &snapshot, &stylesheet, library.as_deref())?;

    events.publish(ExportEvent::PhaseStarted(Phase::Assemble));
    let entry = graph
        .entry()
        .ok_or(ExportError::Resolution(GraphError::EmptyModuleList))?;
    let bootstrap = BootstrapConfig {
        entry_identifier: opts.virtual_root.identifier(entry),
        storage: opts.storage.clone(),
    };
    let document = assemble(DocumentParts {
        title: &plan.title,
        payloads: &payloads,
        bootstrap: &bootstrap,
        degraded: &degraded,
        offline_csp: opts.offline_csp,
    });
    events.publish(ExportEvent::Assembled {
        bytes: document.len(),
    });
    info!(
        bytes = document.len(),
        modules = graph.module_list.len(),
        "document assembled"
    );

    if opts.verify {
        events.publish(ExportEvent::PhaseStarted(Phase::Verify));
        let report = verify_artifact(document.as_str(), &opts.virtual_root)?;
        if !report.is_ok() {
            return Err(ExportError::Verification(report.diagnostics));
        }
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!("Artifact verified: {} modules", report.modules),
            context: None,
        });
    }

    Ok(ExportResult {
        document,
        filename: plan.filename,
        manifest: payloads.manifest_record,
        strategy,
        degraded,
        diagnostics,
    })
}

fn degrade_raster_export(
    reason: &str,
    events: &EventBus,
    diagnostics: &mut Vec<Diagnostic>,
    degraded: &mut Vec<String>,
) {
    warn!(reason, "third-party library unavailable, raster export disabled");
    events.publish(ExportEvent::FeatureDegraded {
        feature: RASTER_EXPORT_FEATURE.to_string(),
        reason: reason.to_string(),
    });
    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Warning,
        message: format!("Raster export disabled: {reason}"),
        context: Some("The third-party rendering library could not be obtained".into()),
    });
    degraded.push(RASTER_EXPORT_FEATURE.to_string());
}

fn collab_failure(what: &str, err: CollabError) -> ExportError {
    ExportError::Acquisition {
        path: what.to_string(),
        phase: Phase::Acquire,
        cause: Box::new(err),
    }
}

/// Save a finished export.
pub fn deliver_export(
    result: &ExportResult,
    delivery: &dyn Delivery,
    events: &EventBus,
) -> Result<PathBuf, ExportError> {
    events.publish(ExportEvent::PhaseStarted(Phase::Deliver));
    let path = delivery.deliver(&result.document, &result.filename)?;
    events.publish(ExportEvent::Delivered { path: path.clone() });
    Ok(path)
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// What [`verify_artifact`] found.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub title: Option<String>,
    pub entry: Option<ModulePath>,
    pub modules: usize,
    pub has_manifest: bool,
    pub has_library: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error)
    }
}

/// Re-read an assembled document and check that it can start offline.
///
/// - every import target of every inline module is an import map key
/// - every manifest module is in the import map with identical text
/// - the bootstrap loads the manifest's entry
///
/// Problems are reported as diagnostics; only an unparseable document is an `Err`.
pub fn verify_artifact(html: &str, root: &VirtualRoot) -> Result<VerifyReport, ExportError> {
    let prior = PriorArtifact::parse(html)?;
    let mut diagnostics = Vec::new();

    match &prior.import_map {
        None => diagnostics.push(error("Artifact has no import map".into())),
        Some(map) => {
            for (identifier, uri) in map.iter() {
                if !root.owns(identifier) {
                    diagnostics.push(error(format!(
                        "Import map key '{identifier}' is outside {root}"
                    )));
                }
                match decode_inline_module(uri) {
                    Ok(text) => {
                        for target in unresolved_targets(&text, map) {
                            diagnostics.push(error(format!(
                                "Unresolved import '{target}' in {identifier}"
                            )));
                        }
                    }
                    Err(e) => diagnostics.push(error(format!(
                        "Module {identifier} cannot be decoded: {e}"
                    ))),
                }
            }
        }
    }

    let mut entry = None;
    let mut modules = 0;
    match &prior.manifest {
        None => diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            message: "Artifact has no source manifest".into(),
            context: Some("It cannot be re-bundled offline".into()),
        }),
        Some(manifest) => {
            modules = manifest.module_list.len();
            entry = manifest.entry().cloned();
            match manifest.decode_files() {
                Ok(files) => {
                    for path in &manifest.module_list {
                        let Some(text) = files.get(path) else {
                            diagnostics.push(error(format!(
                                "Manifest lists {path} but carries no source for it"
                            )));
                            continue;
                        };
                        let identifier = root.identifier(path);
                        match prior.import_map.as_ref().and_then(|m| m.module_text(&identifier)) {
                            None => diagnostics.push(error(format!(
                                "Module {path} is not in the import map as {identifier}"
                            ))),
                            Some(Ok(inline)) if inline != *text => diagnostics.push(error(
                                format!("Import map entry for {path} differs from its manifest source"),
                            )),
                            // Decode failures were reported with the import map.
                            Some(_) => {}
                        }
                    }
                }
                Err(e) => diagnostics.push(error(format!("Manifest cannot be decoded: {e}"))),
            }
        }
    }

    match &entry {
        Some(path) => {
            let call = format!("import({});", script_string_literal(&root.identifier(path)));
            if !html.contains(&call) {
                diagnostics.push(error(format!("Bootstrap does not load entry module {path}")));
            }
        }
        None if prior.manifest.is_some() => {
            diagnostics.push(error("Manifest module list is empty".into()))
        }
        None => {}
    }

    if prior.snapshot.is_none() {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            message: "Artifact has no diagram snapshot".into(),
            context: None,
        });
    }

    Ok(VerifyReport {
        title: prior.title.clone(),
        entry,
        modules,
        has_manifest: prior.manifest.is_some(),
        has_library: prior.library.is_some(),
        diagnostics,
    })
}

fn error(message: String) -> Diagnostic {
    Diagnostic {
        level: DiagnosticLevel::Error,
        message,
        context: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_fails_verification() {
        let report = verify_artifact("<html></html>", &VirtualRoot::default()).unwrap();
        assert!(!report.is_ok());
        assert!(!report.has_manifest);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.message == "Artifact has no import map"));
    }

    #[test]
    fn dangling_import_is_reported() {
        let uri = crate::encode::inline_module("import 'app://standalone/gone.js';");
        let html = format!(
            r#"<script type="importmap">{{"imports":{{"app://standalone/a.js":"{uri}"}}}}</script>"#
        );
        let report = verify_artifact(&html, &VirtualRoot::default()).unwrap();
        assert!(report.diagnostics.iter().any(|d| d.level == DiagnosticLevel::Error
            && d.message.contains("app://standalone/gone.js")));
    }
}
