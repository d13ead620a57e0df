//! Export configuration, loaded from TOML.
//!
//! ```toml
//! title = "Network overview"
//! virtual_root = "app://standalone"
//! entry = "src/main.js"
//! stylesheet = "styles.css"
//! library = "https://cdn.example.com/raster.min.js"
//!
//! # Leave empty to discover modules from `entry`.
//! modules = ["src/main.js", "src/store.js"]
//!
//! [storage]
//! state_key = "diagram-state"
//! timestamp_key = "diagram-state-saved-at"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assemble::StorageKeys;
use crate::graph::ModuleSet;
use crate::resolve::{ModulePath, ResolveError};
use crate::utils::{suggested_filename, VirtualRoot, DEFAULT_VIRTUAL_ROOT};
use crate::{ExportOptions, ExportPlan};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid module path in `{field}`: {source}")]
    ModulePath {
        field: &'static str,
        #[source]
        source: ResolveError,
    },

    #[error("virtual root '{0}' must be a URL-like prefix such as app://standalone")]
    VirtualRoot(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub title: String,
    pub virtual_root: String,
    /// Entry module. Used for discovery when `modules` is empty.
    pub entry: String,
    /// Fixed module list; the first element is the entry.
    pub modules: Vec<String>,
    /// Stylesheet location relative to the source origin.
    pub stylesheet: Option<String>,
    /// Third-party library location: origin-relative path or absolute URL.
    pub library: Option<String>,
    /// Output filename. Derived from the title when unset.
    pub output: Option<String>,
    pub storage: StorageKeys,
    pub offline_csp: bool,
    pub fetch_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            title: "Diagram".into(),
            virtual_root: DEFAULT_VIRTUAL_ROOT.into(),
            entry: "src/main.js".into(),
            modules: Vec::new(),
            stylesheet: None,
            library: None,
            output: None,
            storage: StorageKeys::default(),
            offline_csp: true,
            fetch_timeout_secs: 30,
        }
    }
}

impl ExportConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn virtual_root(&self) -> Result<VirtualRoot, ConfigError> {
        let root = self.virtual_root.trim_end_matches('/');
        let valid = root
            .split_once("://")
            .is_some_and(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty());
        if !valid {
            return Err(ConfigError::VirtualRoot(self.virtual_root.clone()));
        }
        Ok(VirtualRoot::new(root))
    }

    pub fn module_set(&self) -> Result<ModuleSet, ConfigError> {
        if self.modules.is_empty() {
            let entry = ModulePath::parse(&self.entry)
                .map_err(|source| ConfigError::ModulePath { field: "entry", source })?;
            return Ok(ModuleSet::Discover { entry });
        }
        let modules = self
            .modules
            .iter()
            .map(|raw| ModulePath::parse(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ConfigError::ModulePath { field: "modules", source })?;
        Ok(ModuleSet::Fixed { modules })
    }

    pub fn output_filename(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| suggested_filename(&self.title))
    }

    pub fn plan(&self) -> Result<ExportPlan, ConfigError> {
        Ok(ExportPlan {
            module_set: self.module_set()?,
            title: self.title.clone(),
            filename: self.output_filename(),
        })
    }

    pub fn options(&self) -> Result<ExportOptions, ConfigError> {
        Ok(ExportOptions {
            virtual_root: self.virtual_root()?,
            storage: self.storage.clone(),
            offline_csp: self.offline_csp,
            verify: true,
        })
    }
}
