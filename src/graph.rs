//! Module graph construction.
//!
//! acquire -> rewrite -> register, for either a pre-declared module list or a
//! set discovered by following imports from the entry. The resulting graph is
//! closed: every import target of every rewritten source is a key of the
//! import mapping, or the build fails.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::acquire::{AcquireError, SourceAcquirer};
use crate::encode::ImportMapping;
use crate::events::{EventBus, ExportEvent};
use crate::resolve::ModulePath;
use crate::rewrite::{rewrite, RewriteError, RewrittenSource};
use crate::utils::{validate_closure, VirtualRoot};
use crate::Diagnostic;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("module list is empty")]
    EmptyModuleList,

    #[error("module {0} is listed more than once")]
    DuplicateModule(ModulePath),

    #[error("import graph is not closed: {}", summarize(.0))]
    Unresolved(Vec<Diagnostic>),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Which modules make up the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ModuleSet {
    /// Pre-declared list. The first entry is the application entry point.
    Fixed { modules: Vec<ModulePath> },
    /// Follow imports transitively from the entry.
    Discover { entry: ModulePath },
}

/// A closed set of rewritten modules plus the mapping that loads them.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    /// Build order; `module_list[0]` is the entry.
    pub module_list: Vec<ModulePath>,
    pub sources: BTreeMap<ModulePath, RewrittenSource>,
    pub import_mapping: ImportMapping,
}

impl ModuleGraph {
    pub fn entry(&self) -> Option<&ModulePath> {
        self.module_list.first()
    }

    /// Every module path referenced by an import in any source.
    pub fn referenced(&self) -> BTreeSet<&ModulePath> {
        self.sources.values().flat_map(|s| s.targets.iter()).collect()
    }
}

pub struct GraphBuilder<'a> {
    acquirer: &'a SourceAcquirer,
    root: &'a VirtualRoot,
    events: Option<&'a EventBus>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(acquirer: &'a SourceAcquirer, root: &'a VirtualRoot) -> Self {
        Self {
            acquirer,
            root,
            events: None,
        }
    }

    pub fn with_events(mut self, events: &'a EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the graph.
    ///
    /// When the acquirer is warm, the module list recorded in the manifest
    /// takes the place of `set`: the artifact knows exactly what it contains.
    pub async fn build(&self, set: &ModuleSet) -> Result<ModuleGraph, GraphError> {
        if let Some(list) = self.acquirer.manifest_module_list() {
            debug!("using module list recorded in the source manifest");
            return self.build_fixed(list).await;
        }
        match set {
            ModuleSet::Fixed { modules } => self.build_fixed(modules).await,
            ModuleSet::Discover { entry } => self.build_discovered(entry).await,
        }
    }

    async fn build_fixed(&self, modules: &[ModulePath]) -> Result<ModuleGraph, GraphError> {
        if modules.is_empty() {
            return Err(GraphError::EmptyModuleList);
        }
        let mut seen = BTreeSet::new();
        for path in modules {
            if !seen.insert(path) {
                return Err(GraphError::DuplicateModule(path.clone()));
            }
        }

        let acquired = self.acquirer.acquire(modules).await?;
        let mut graph = ModuleGraph {
            module_list: modules.to_vec(),
            sources: BTreeMap::new(),
            import_mapping: ImportMapping::new(),
        };
        for path in modules {
            self.register(&mut graph, path, &acquired[path])?;
        }

        self.check_closure(&graph)?;
        info!(modules = graph.module_list.len(), "module graph built from fixed list");
        Ok(graph)
    }

    async fn build_discovered(&self, entry: &ModulePath) -> Result<ModuleGraph, GraphError> {
        let mut graph = ModuleGraph {
            module_list: Vec::new(),
            sources: BTreeMap::new(),
            import_mapping: ImportMapping::new(),
        };
        let mut seen: BTreeSet<ModulePath> = BTreeSet::from([entry.clone()]);
        let mut frontier = vec![entry.clone()];

        // Breadth-first; each wave is acquired concurrently.
        while !frontier.is_empty() {
            let acquired = self.acquirer.acquire(&frontier).await?;
            let mut next = Vec::new();
            for path in &frontier {
                graph.module_list.push(path.clone());
                let rewritten = self.register(&mut graph, path, &acquired[path])?;
                for target in rewritten {
                    if seen.insert(target.clone()) {
                        next.push(target);
                    }
                }
            }
            frontier = next;
        }

        self.check_closure(&graph)?;
        info!(modules = graph.module_list.len(), "module graph discovered from entry");
        Ok(graph)
    }

    /// Rewrite one module and register it under its virtual identifier.
    /// Returns the module's import targets.
    fn register(
        &self,
        graph: &mut ModuleGraph,
        path: &ModulePath,
        source: &str,
    ) -> Result<Vec<ModulePath>, GraphError> {
        let rewritten = rewrite(path, source, self.root)?;
        graph
            .import_mapping
            .insert(self.root.identifier(path), &rewritten.text);
        debug!(module = %path, imports = rewritten.targets.len(), "module registered");
        if let Some(events) = self.events {
            events.publish(ExportEvent::ModuleRegistered {
                path: path.clone(),
                bytes: rewritten.text.len(),
            });
        }
        let targets = rewritten.targets.clone();
        graph.sources.insert(path.clone(), rewritten);
        Ok(targets)
    }

    fn check_closure(&self, graph: &ModuleGraph) -> Result<(), GraphError> {
        validate_closure(graph.sources.values(), &graph.import_mapping)
            .map_err(GraphError::Unresolved)
    }
}
