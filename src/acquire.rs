//! Source acquisition.
//!
//! Two strategies, chosen once per export from the [`ExecutionContext`]:
//!
//! - **Warm**: the context carries a prior artifact with a source manifest.
//!   Every module comes from the manifest; the fetcher is never called, even
//!   when it would succeed.
//! - **Cold**: each module is fetched from the origin. Fetches run
//!   concurrently and are awaited as a group; the first failure cancels the
//!   rest and fails the whole acquisition.

pub mod artifact;
pub mod fetcher;

use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::encode::{EncodingError, SourceManifest};
use crate::resolve::ModulePath;
use artifact::{ArtifactError, PriorArtifact};
use fetcher::{FetchError, SourceFetcher};

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("failed to fetch {path}: {cause}")]
    Fetch {
        path: String,
        #[source]
        cause: FetchError,
    },

    #[error("{path} is not present in the embedded source manifest")]
    MissingFromManifest { path: ModulePath },

    #[error("embedded manifest entry could not be decoded: {0}")]
    Decode(#[from] EncodingError),
}

/// How sources are being obtained for this export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Cold,
    Warm,
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Where the bundler is running: a hosted application, or inside an artifact.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    prior: Option<PriorArtifact>,
}

impl ExecutionContext {
    pub fn hosted() -> Self {
        Self::default()
    }

    /// Context for code running inside a previously exported document.
    pub fn from_artifact(html: &str) -> Result<Self, ArtifactError> {
        Ok(Self {
            prior: Some(PriorArtifact::parse(html)?),
        })
    }

    pub fn prior(&self) -> Option<&PriorArtifact> {
        self.prior.as_ref()
    }

    pub fn manifest(&self) -> Option<&SourceManifest> {
        self.prior.as_ref().and_then(|p| p.manifest.as_ref())
    }

    pub fn strategy(&self) -> Strategy {
        if self.manifest().is_some() {
            Strategy::Warm
        } else {
            Strategy::Cold
        }
    }

    /// Stylesheet text embedded in the prior artifact. The manifest copy is
    /// exact and preferred over the `<style>` element.
    pub fn embedded_stylesheet(&self) -> Result<Option<String>, EncodingError> {
        if let Some(css) = self.manifest().map(SourceManifest::stylesheet).transpose()?.flatten() {
            return Ok(Some(css));
        }
        Ok(self.prior.as_ref().and_then(|p| p.stylesheet.clone()))
    }

    pub fn embedded_library(&self) -> Result<Option<String>, EncodingError> {
        if let Some(code) = self.manifest().map(SourceManifest::library).transpose()?.flatten() {
            return Ok(Some(code));
        }
        Ok(self.prior.as_ref().and_then(|p| p.library.clone()))
    }

    /// Features the prior artifact was assembled without.
    pub fn prior_degraded(&self) -> &[String] {
        self.prior.as_ref().map_or(&[], |p| p.degraded.as_slice())
    }

    pub fn embedded_snapshot(&self) -> Option<&str> {
        self.prior.as_ref().and_then(|p| p.snapshot.as_deref())
    }
}

// ---------------------------------------------------------------------------
// SourceAcquirer
// ---------------------------------------------------------------------------

pub type AcquiredSources = BTreeMap<ModulePath, ArcStr>;

pub struct SourceAcquirer {
    fetcher: Arc<dyn SourceFetcher>,
    /// Decoded manifest files when running warm. Treated as immutable input.
    warm: Option<WarmSources>,
}

struct WarmSources {
    files: AcquiredSources,
    module_list: Vec<ModulePath>,
}

impl SourceAcquirer {
    /// Select the strategy for `context`. A manifest is decoded up front so a
    /// corrupt entry fails before any work starts.
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        context: &ExecutionContext,
    ) -> Result<Self, AcquireError> {
        let warm = match context.manifest() {
            Some(manifest) => {
                let files = manifest
                    .decode_files()?
                    .into_iter()
                    .map(|(path, text)| (path, ArcStr::from(text)))
                    .collect();
                info!(
                    modules = manifest.module_list.len(),
                    "source manifest found, acquiring offline"
                );
                Some(WarmSources {
                    files,
                    module_list: manifest.module_list.clone(),
                })
            }
            None => {
                info!(origin = %fetcher.origin(), "no source manifest, acquiring from origin");
                None
            }
        };
        Ok(Self { fetcher, warm })
    }

    pub fn strategy(&self) -> Strategy {
        if self.warm.is_some() {
            Strategy::Warm
        } else {
            Strategy::Cold
        }
    }

    /// The module list recorded by the prior export, when running warm.
    pub fn manifest_module_list(&self) -> Option<&[ModulePath]> {
        self.warm.as_ref().map(|w| w.module_list.as_slice())
    }

    /// Acquire every module in `modules`. All-or-nothing.
    pub async fn acquire(&self, modules: &[ModulePath]) -> Result<AcquiredSources, AcquireError> {
        if let Some(warm) = &self.warm {
            return modules
                .iter()
                .map(|path| {
                    warm.files
                        .get(path)
                        .map(|text| (path.clone(), text.clone()))
                        .ok_or_else(|| AcquireError::MissingFromManifest { path: path.clone() })
                })
                .collect();
        }

        let fetches = modules.iter().map(|path| async move {
            let text = self
                .fetcher
                .fetch(path.as_str())
                .await
                .map_err(|cause| AcquireError::Fetch {
                    path: path.to_string(),
                    cause,
                })?;
            debug!(module = %path, bytes = text.len(), "module acquired");
            Ok::<_, AcquireError>((path.clone(), ArcStr::from(text)))
        });

        Ok(try_join_all(fetches).await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::EncodedText;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MapFetcher {
        files: BTreeMap<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for MapFetcher {
        async fn fetch(&self, location: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(location)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    location: location.into(),
                })
        }

        fn origin(&self) -> String {
            "memory".into()
        }
    }

    fn path(raw: &str) -> ModulePath {
        ModulePath::parse(raw).unwrap()
    }

    fn warm_context(files: &[(&str, &str)]) -> ExecutionContext {
        let manifest = SourceManifest {
            files: files
                .iter()
                .map(|(p, t)| (path(p), EncodedText::encode(t)))
                .collect(),
            module_list: files.iter().map(|(p, _)| path(p)).collect(),
            third_party_library_encoded: None,
            stylesheet_encoded: Some(EncodedText::encode("body { margin: 0 }")),
        };
        ExecutionContext {
            prior: Some(PriorArtifact {
                manifest: Some(manifest),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn cold_fetches_every_module() {
        let fetcher = Arc::new(MapFetcher {
            files: BTreeMap::from([
                ("a.js".to_string(), "A".to_string()),
                ("b.js".to_string(), "B".to_string()),
            ]),
            ..Default::default()
        });
        let acquirer = SourceAcquirer::new(fetcher.clone(), &ExecutionContext::hosted()).unwrap();
        assert_eq!(acquirer.strategy(), Strategy::Cold);

        let sources = acquirer.acquire(&[path("a.js"), path("b.js")]).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[&path("b.js")].as_str(), "B");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cold_missing_module_fails_whole_acquisition() {
        let fetcher = Arc::new(MapFetcher {
            files: BTreeMap::from([("a.js".to_string(), "A".to_string())]),
            ..Default::default()
        });
        let acquirer = SourceAcquirer::new(fetcher, &ExecutionContext::hosted()).unwrap();
        let err = acquirer.acquire(&[path("a.js"), path("gone.js")]).await.unwrap_err();
        assert!(matches!(err, AcquireError::Fetch { ref path, .. } if path == "gone.js"));
    }

    #[tokio::test]
    async fn warm_never_touches_fetcher() {
        let fetcher = Arc::new(MapFetcher {
            files: BTreeMap::from([("a.js".to_string(), "network copy".to_string())]),
            ..Default::default()
        });
        let context = warm_context(&[("a.js", "manifest copy ✓")]);
        let acquirer = SourceAcquirer::new(fetcher.clone(), &context).unwrap();
        assert_eq!(acquirer.strategy(), Strategy::Warm);
        assert_eq!(acquirer.manifest_module_list(), Some(&[path("a.js")][..]));

        let sources = acquirer.acquire(&[path("a.js")]).await.unwrap();
        assert_eq!(sources[&path("a.js")].as_str(), "manifest copy ✓");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        let err = acquirer.acquire(&[path("b.js")]).await.unwrap_err();
        assert!(matches!(err, AcquireError::MissingFromManifest { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn embedded_stylesheet_prefers_manifest() {
        let mut context = warm_context(&[("a.js", "")]);
        if let Some(prior) = context.prior.as_mut() {
            prior.stylesheet = Some("from element".into());
        }
        assert_eq!(
            context.embedded_stylesheet().unwrap().as_deref(),
            Some("body { margin: 0 }")
        );
        assert_eq!(ExecutionContext::hosted().embedded_stylesheet().unwrap(), None);
    }
}
