use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bridge_common::Bundle;
use tokio::sync::OnceCell;
use tracing::info;

use crate::{RequestError, Requester};

/// A bundle's source as received from the host.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBundle {
    pub bundle: Bundle,
    pub source: Arc<str>,
}

impl LoadedBundle {
    /// The source wrapped in a function scope so its webpack runtime can be
    /// evaluated without leaking helpers into the worker's globals.
    pub fn script(&self) -> String {
        format!("(function() {{\n{}\n}})();\n", self.source)
    }

    /// Global the evaluated script defines.
    pub fn global(&self) -> &'static str {
        self.bundle.global()
    }
}

/// Worker-side memo of fetched bundles: each one crosses the bridge once.
#[derive(Default)]
pub struct BundleLoader {
    loaded: Mutex<HashMap<Bundle, Arc<OnceCell<LoadedBundle>>>>,
}

impl BundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(
        &self,
        requester: &Requester,
        bundle: Bundle,
    ) -> Result<LoadedBundle, RequestError> {
        let cell = {
            let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(loaded.entry(bundle).or_default())
        };
        let loaded = cell
            .get_or_try_init(|| async {
                let source = requester.bundle(bundle).await?;
                if source.trim().is_empty() {
                    return Err(RequestError::EmptyBundle(bundle.name()));
                }
                info!(bundle = bundle.name(), bytes = source.len(), "bundle loaded");
                Ok(LoadedBundle {
                    bundle,
                    source: Arc::from(source),
                })
            })
            .await?;
        Ok(loaded.clone())
    }

    pub fn is_loaded(&self, bundle: Bundle) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bundle)
            .map_or(false, |cell| cell.initialized())
    }
}
