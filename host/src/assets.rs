//! Bundle fetching and the per-responder asset cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bridge_common::Bundle;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Failed to fetch {bundle} bundle from {url}: {source}")]
    Network {
        bundle: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to fetch {bundle} bundle from {url}: HTTP {status}")]
    Status {
        bundle: &'static str,
        url: String,
        status: u16,
    },
    #[error("Bundle {0} not found")]
    NotFound(&'static str),
}

/// Fetch-by-name capability for the bundles the static site ships.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    async fn fetch(&self, bundle: Bundle) -> Result<String, AssetError>;
}

pub struct HttpAssetProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAssetProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpAssetProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, bundle: Bundle) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            bundle.file_name()
        )
    }
}

#[async_trait]
impl AssetProvider for HttpAssetProvider {
    async fn fetch(&self, bundle: Bundle) -> Result<String, AssetError> {
        let url = self.url(bundle);
        let network = |source| AssetError::Network {
            bundle: bundle.name(),
            url: url.clone(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status {
                bundle: bundle.name(),
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let text = response.text().await.map_err(network)?;
        debug!(bundle = bundle.name(), bytes = text.len(), "bundle downloaded");
        Ok(text)
    }
}

/// Fetched bundles, populated at most once per bundle.
///
/// Concurrent requests for an uncached bundle share a single fetch. A failed
/// fetch leaves the entry empty so a later request tries again. Entries are
/// never evicted; the cache lives as long as the responder owning it.
pub struct AssetCache {
    provider: Arc<dyn AssetProvider>,
    entries: Mutex<HashMap<Bundle, Arc<OnceCell<Arc<str>>>>>,
}

impl AssetCache {
    pub fn new(provider: Arc<dyn AssetProvider>) -> Self {
        AssetCache {
            provider,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, bundle: Bundle) -> Result<Arc<str>, AssetError> {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(bundle).or_default())
        };
        let text = cell
            .get_or_try_init(|| async {
                info!(bundle = bundle.name(), "fetching bundle");
                self.provider.fetch(bundle).await.map(Arc::from)
            })
            .await?;
        Ok(Arc::clone(text))
    }

    pub fn is_cached(&self, bundle: Bundle) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bundle)
            .map_or(false, |cell| cell.initialized())
    }
}
